//! Face geometry for the beauty pipeline.
//!
//! Everything in this crate is CPU-side and deterministic; the GPU passes in
//! `postfx` only consume its output. The per-frame flow for one face is:
//!
//! ```text
//!   i16 detector block ──▶ split_faces ──▶ FaceLandmarks (106 pts)
//!                                              │ FaceAnalysis::analyze
//!                                              ▼
//!                         extend (forehead band + outline ring, 134 pts)
//!                                              │ warp_face(KnobSet)
//!                                              ▼
//!                 WarpedFace { rest, target, paras } ──▶ FaceMesh / MaskMesh
//! ```
//!
//! Coordinates are frame pixels with the origin in the top-left corner.

pub mod knobs;
pub mod landmarks;
pub mod mesh;
pub mod synthetic;
pub mod vector;
pub mod warp;

pub use knobs::{Knob, KnobSet, UnknownKnob, KNOB_COUNT};
pub use landmarks::{split_faces, FaceLandmarks, LandmarkError};
pub use mesh::{triangulate, FaceMesh, MaskMesh};
pub use vector::{Matrix3x3, Vector2};
pub use warp::{warp_face, EyeBulge, FaceAnalysis, FeatureParas, WarpedFace};
