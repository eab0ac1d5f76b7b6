mod tailer;

pub use tailer::LogTailer;
