//! The six pipeline stages, in pipeline order: mesh warp, skin beauty,
//! styled looks, color grade, background replacement, presentation.

pub mod adv_beauty;
pub mod beauty;
pub mod lut;
pub mod normal;
pub mod styled;
pub mod virtual_back;

pub use adv_beauty::AdvBeautyFilter;
pub use beauty::{BeautyFilter, MAX_PROTECTED_EYES};
pub use lut::LutFilter;
pub use normal::NormalFilter;
pub use styled::{PassChain, StyleKind, StyledFilter, UnknownStyle};
pub use virtual_back::{Background, VirtualBackFilter, DEFAULT_BACK_COLOR};
