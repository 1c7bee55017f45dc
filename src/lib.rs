pub mod backends;
pub mod capture;
pub mod color;
pub mod config;
pub mod console_display;
pub mod cursor;
pub mod dsp;
pub mod keymap;
pub mod prefs;
pub mod producer;
pub mod ring;
pub mod types;
pub mod view;
