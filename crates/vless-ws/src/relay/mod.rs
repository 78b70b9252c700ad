pub mod copy;
pub mod flow;

pub use copy::{ws_io_error, Copier};
pub use flow::FlowStat;
