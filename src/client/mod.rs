//! The capture side: a studio state machine over the imaging pipeline and
//! the transport that ships its artifact to the ingest server.

pub mod studio;
pub mod transport;

pub use studio::{
    Command, CompletedUpload, Preview, Stage, Studio, StudioError, StudioEvent, StudioSettings,
    UploadStatus,
};
pub use transport::{TransportError, UploadClient, UploadProgress, UploadReceipt};
