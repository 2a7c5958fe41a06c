pub mod text;
pub mod worksheet;
