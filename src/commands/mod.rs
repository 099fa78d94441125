pub mod apply;
pub mod materialize;
pub mod process;
pub mod train;
