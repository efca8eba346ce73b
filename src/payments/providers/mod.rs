pub mod razorpayx;

pub use razorpayx::{RazorpayXConfig, RazorpayXProvider};
