pub mod capture;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod mode;
pub mod overlay;
pub mod presentation;
pub mod scanner;
pub mod tracker;
pub mod transform;
