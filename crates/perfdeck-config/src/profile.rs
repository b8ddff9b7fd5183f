//! A named toolchain profile.
//!
//! Profiles carry the per-target paths the analysis side needs to symbolize
//! a recording: sysroot, application path, extra library and debug search
//! paths, kallsyms, target architecture, and the objdump to use.

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordProfile {
    pub sysroot: String,
    pub app_path: String,
    pub extra_lib_paths: Vec<String>,
    pub debug_paths: Vec<String>,
    pub kallsyms: String,
    /// Empty means auto-detect.
    pub arch: String,
    pub objdump: String,
}

impl RecordProfile {
    /// The extra library search paths in their colon-joined form.
    pub fn extra_lib_path_string(&self) -> String {
        join_path_list(&self.extra_lib_paths)
    }

    pub fn debug_path_string(&self) -> String {
        join_path_list(&self.debug_paths)
    }

    pub fn set_extra_lib_paths(&mut self, joined: &str) {
        self.extra_lib_paths = split_path_list(joined);
    }

    pub fn set_debug_paths(&mut self, joined: &str) {
        self.debug_paths = split_path_list(joined);
    }
}

pub fn join_path_list(paths: &[String]) -> String {
    paths.join(":")
}

/// Splits a colon-joined path list, skipping empty segments.
pub fn split_path_list(joined: &str) -> Vec<String> {
    joined
        .split(':')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}
