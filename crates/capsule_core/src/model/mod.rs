mod capsule;

pub use capsule::{
    Attachment, AttachmentKind, Capsule, CapsuleProjection, CapsuleStatus, parse_timestamp,
};
