//! Real-time multi-pass post-processing for video frames on headless wgpu.
//!
//! [`Filters`] chains six stages over one GPU context: landmark-driven
//! face warping, skin smoothing with whitening and reddening, stylized
//! looks, LUT color grading, virtual backgrounds and the final present.
//! Every stage passes its input through untouched while idle.

pub mod filter;
pub mod filters;
pub mod gpu;
mod pipeline;

pub use filter::{Filter, FilterCore, Quad, SizeRule, QUAD_VS};
pub use filters::{
    AdvBeautyFilter, Background, BeautyFilter, LutFilter, NormalFilter, PassChain, StyleKind,
    StyledFilter, UnknownStyle, VirtualBackFilter, DEFAULT_BACK_COLOR, MAX_PROTECTED_EYES,
};
pub use pipeline::Filters;
