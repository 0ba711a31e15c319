mod app;

// for main.rs
pub use app::run;
