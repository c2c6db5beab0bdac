pub mod rounds;
pub mod sessions;
