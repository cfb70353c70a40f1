pub mod session;
pub mod stream;

pub use session::{SessionStatus, StreamSession, StreamState};
pub use stream::FrameStream;
