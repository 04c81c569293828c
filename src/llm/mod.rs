pub mod openai;
pub mod provider;
#[cfg(any(test, feature = "test-support"))]
pub mod scripted;
pub mod sse;
