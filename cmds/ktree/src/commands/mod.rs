pub mod contexts;
pub mod fields;
pub mod kinds;
pub mod tree;
pub mod watch;

pub mod util;
