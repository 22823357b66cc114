//! Frame alignment across the stimulus, 2p, pupil and body-camera clocks,
//! plus the behavioural streams repaired on the stimulus and pupil clocks.

pub mod frames;
pub mod pupil;
pub mod running;

pub use frames::{interp, FrameAlignment};
pub use pupil::{remove_blinks, Pupil};
pub use running::{repair_running, RunningSpeed};
