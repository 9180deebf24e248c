//! 前端：行式控制台（同时充当交互式确认通道）

pub mod console;

pub use console::{describe_event, Console};
