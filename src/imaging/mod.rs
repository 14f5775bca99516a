pub mod assets;
pub mod codec;
pub mod transfer;

pub use assets::{DirAssetSource, ImageAssetSource, MemoryAssetSource};
pub use codec::{resize_to_match, similarity, split, to_single_channel};
