pub mod channel;
pub mod error;
pub mod flv;
pub mod gop;
pub mod hls;
pub mod png;
pub mod rtmp;

pub use channel::{LiveChannel, LiveRegistry, LiveSettings};
pub use error::{StreamError, StreamResult};
pub use flv::FlvSession;
pub use gop::{GopBuffer, GopConfig, MediaFrame};
pub use hls::HlsRemuxer;
pub use rtmp::{PublishAuth, RtmpServer};
