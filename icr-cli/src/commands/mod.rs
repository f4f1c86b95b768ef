pub mod extract;
pub mod hash;
pub mod parse;
pub mod scan;
pub mod stitch;
