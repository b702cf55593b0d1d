//! Math and collection helpers shared by the atlas stages.

pub mod frustum;
pub mod typedefs;
