use std::path::PathBuf;

pub const DAEMON_TCP_PORT: u16 = 9977;
const DAEMON_TCP_HOST: &str = "127.0.0.1";

pub fn daemon_address() -> String {
    format!("{}:{}", DAEMON_TCP_HOST, DAEMON_TCP_PORT)
}

/// IPC endpoint name for one player instance.  Every handle gets its own
/// socket so that several mpv processes can coexist.
#[cfg(unix)]
pub fn mpv_socket_name(handle_id: u64) -> String {
    format!(
        "{}/zaptv-mpv-{}-{}.sock",
        std::env::temp_dir().display(),
        std::process::id(),
        handle_id
    )
}

#[cfg(windows)]
pub fn mpv_socket_name(handle_id: u64) -> String {
    format!("zaptv-mpv-{}-{}", std::process::id(), handle_id)
}

#[cfg(unix)]
pub fn mpv_socket_arg(handle_id: u64) -> String {
    format!("--input-ipc-server={}", mpv_socket_name(handle_id))
}

#[cfg(windows)]
pub fn mpv_socket_arg(handle_id: u64) -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name(handle_id))
}

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/zaptv/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("zaptv")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zaptv")
    }
}

pub fn config_dir() -> PathBuf {
    // On Windows, check for a portable config.toml in the executable
    // directory first
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let portable_config = exe_dir.join("config.toml");
                if portable_config.exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }
    }

    // On macOS and Linux, always use ~/.config/zaptv/
    // (avoid macOS Application Support folder for consistency)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("zaptv")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zaptv")
    }
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// Find the mpv binary: beside the current exe first, then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    let exe_name = mpv_binary_name();

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    // Search PATH
    if let Ok(path) = std::env::var("PATH") {
        #[cfg(unix)]
        let separator = ":";
        #[cfg(windows)]
        let separator = ";";

        for dir in path.split(separator) {
            let mpv_path = PathBuf::from(dir).join(exe_name);
            if mpv_path.exists() {
                return Some(mpv_path);
            }
        }
    }

    None
}
