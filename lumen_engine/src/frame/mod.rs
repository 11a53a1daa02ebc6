/// Frame lifecycle: presentation chain, render targets, frame slots and the loop driving them

pub mod config;
pub mod presentation_chain;
pub mod render_target_set;
pub mod frame_sync_set;
pub mod frame_loop;

pub use config::*;
pub use presentation_chain::{
    PresentationChain, Generation, SurfaceConfig,
    choose_image_count, choose_surface_format, choose_present_mode, choose_extent, negotiate,
};
pub use render_target_set::{RenderTargetSet, CompositeTarget, choose_sample_count, choose_depth_format};
pub use frame_sync_set::{FrameSyncSet, FrameSlot};
pub use frame_loop::{FrameLoop, FrameState, FrameStatus, FrameContext};
