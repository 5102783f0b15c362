//! Process table enumeration

use std::collections::HashSet;

use super::normalize_name;

/// Normalized names of every running process
pub fn running_process_names() -> HashSet<String> {
    #[cfg(target_os = "macos")]
    {
        running_process_names_macos()
    }

    #[cfg(target_os = "linux")]
    {
        running_process_names_linux()
    }

    #[cfg(target_os = "windows")]
    {
        running_process_names_windows()
    }
}

// ============================================================================
// macOS Implementation
// ============================================================================

#[cfg(target_os = "macos")]
fn running_process_names_macos() -> HashSet<String> {
    use std::process::Command;

    let output = match Command::new("ps").args(["-axco", "comm"]).output() {
        Ok(output) if output.status.success() => output,
        _ => return HashSet::new(),
    };

    parse_lines(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(any(target_os = "macos", test))]
fn parse_lines(output: &str) -> HashSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "COMM")
        .map(normalize_name)
        .collect()
}

// ============================================================================
// Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
fn running_process_names_linux() -> HashSet<String> {
    use std::fs;

    let mut names = HashSet::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return names;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_pid = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.parse::<u32>().is_ok());
        if !is_pid {
            continue;
        }

        // Wine clients show up under their Windows executable name
        if let Ok(comm) = fs::read_to_string(path.join("comm")) {
            names.insert(normalize_name(&comm));
        }
    }

    names
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(target_os = "windows")]
fn running_process_names_windows() -> HashSet<String> {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;

    #[repr(C)]
    struct ProcessEntry32W {
        dw_size: u32,
        cnt_usage: u32,
        th32_process_id: u32,
        th32_default_heap_id: usize,
        th32_module_id: u32,
        cnt_threads: u32,
        th32_parent_process_id: u32,
        pc_pri_class_base: i32,
        dw_flags: u32,
        sz_exe_file: [u16; 260],
    }

    #[link(name = "kernel32")]
    extern "system" {
        fn CreateToolhelp32Snapshot(flags: u32, pid: u32) -> *mut std::ffi::c_void;
        fn Process32FirstW(snapshot: *mut std::ffi::c_void, entry: *mut ProcessEntry32W) -> i32;
        fn Process32NextW(snapshot: *mut std::ffi::c_void, entry: *mut ProcessEntry32W) -> i32;
        fn CloseHandle(handle: *mut std::ffi::c_void) -> i32;
    }

    const TH32CS_SNAPPROCESS: u32 = 0x00000002;
    const INVALID_HANDLE_VALUE: *mut std::ffi::c_void = -1isize as *mut std::ffi::c_void;

    let mut names = HashSet::new();

    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
        if snapshot == INVALID_HANDLE_VALUE {
            return names;
        }

        let mut entry: ProcessEntry32W = std::mem::zeroed();
        entry.dw_size = std::mem::size_of::<ProcessEntry32W>() as u32;

        if Process32FirstW(snapshot, &mut entry) != 0 {
            loop {
                let len = entry
                    .sz_exe_file
                    .iter()
                    .position(|&c| c == 0)
                    .unwrap_or(entry.sz_exe_file.len());
                let name = OsString::from_wide(&entry.sz_exe_file[..len]);
                names.insert(normalize_name(&name.to_string_lossy()));

                if Process32NextW(snapshot, &mut entry) == 0 {
                    break;
                }
            }
        }

        CloseHandle(snapshot);
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ps_output_is_normalized() {
        let names = parse_lines("COMM\n  Wow\nlaunchd\n\nBattle.net.exe\n");
        assert!(names.contains("wow"));
        assert!(names.contains("launchd"));
        assert!(names.contains("battle.net"));
        assert_eq!(names.len(), 3);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_process_is_listed() {
        let names = running_process_names();
        assert!(!names.is_empty());
    }
}
