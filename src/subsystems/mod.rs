//! Subsystem modules, leaves first: chapters come from `source`, are
//! analysed by `analysis`, accumulate in `memory` and are written out by
//! `render`; `pipeline` drives them in order.

pub mod analysis;
pub mod memory;
pub mod pipeline;
pub mod render;
pub mod source;
