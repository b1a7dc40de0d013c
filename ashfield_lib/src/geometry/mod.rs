//! The grid model: coordinates, directions, pixel layout and line walks.
//!
//! Everything else in the crate speaks in these terms. The module is pure
//! math with no access to field state, which keeps the stepping and
//! distance rules testable in isolation.

mod direction;
mod layout;
mod position;
mod tracing;

pub use direction::{
    far_dir, far_dir_offset, near_dir, ring_offsets, ring_table_len, rotate_steps, step_raw,
    steps_xy, Dir,
};
pub use layout::{pixel_dist, GridLayout};
pub use position::{GridSize, MapHex, RawHex, Topology};
pub use tracing::LineTracer;
