pub mod fakes;
pub mod phone;
pub mod reply;
pub mod tags;
pub mod tools;
pub mod traits;
pub mod types;

pub use tags::{LeadTemperature, Tag, TagSet};
pub use traits::*;
pub use types::*;
