pub mod clusters;
pub mod policies;
pub mod projects;
pub mod sessions;
pub mod users;
