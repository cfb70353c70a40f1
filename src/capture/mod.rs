pub mod demux;
pub mod frame;
pub mod modes;
pub mod supervisor;

pub use demux::FrameDemuxer;
pub use frame::Frame;
pub use modes::{CaptureMode, ModeCatalog};
pub use supervisor::{ProcessHandle, ProcessSupervisor};
