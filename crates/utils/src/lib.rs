pub mod assets;
pub mod pagination;
pub mod response;
