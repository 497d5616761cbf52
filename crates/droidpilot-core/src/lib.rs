//! Core types and logic for droidpilot.
//!
//! This crate holds the pure half of the engine: everything that can be
//! computed without a device attached. The CLI crate supplies the device
//! channel, stores and the executor.
//!
//! # Modules
//!
//! - [`script`]: parsed script model (commands, typed parameters)
//! - [`parser`]: line-oriented script parser
//! - [`ui`]: UI hierarchy types and uiautomator dump parsing
//! - [`locator`]: alias → locator definition documents
//! - [`matching`]: attribute-based element matching strategies
//! - [`input`]: device shell command encoding
//! - [`result`]: execution result records
//! - [`error`]: step errors with actionable suggestions
//!
//! # Script Format
//!
//! ```text
//! case: TC-001
//! scriptName: 登录流程
//! details:
//!   package: com.example.app
//!   activity: .MainActivity
//! steps:
//!   启动应用
//!   点击 [{登录按钮}]
//!   输入 [{用户名}, "alice"]
//!   等待 [2s]
//!   断言 [{欢迎语}, 存在]
//! ```
//!
//! | Parameter | Example | Type |
//! |-----------|---------|------|
//! | Quoted text | `"alice"` | Literal |
//! | Number | `3` | Integer |
//! | Duration | `10s`, `500ms` | Duration |
//! | Point | `{200,400}`, `200,400` | Coordinate |
//! | Template | `@{logo}` | ImageReference |
//! | Alias | `{登录按钮}` | ElementReference |

pub mod error;
pub mod input;
pub mod locator;
pub mod matching;
pub mod parser;
pub mod result;
pub mod script;
pub mod ui;
