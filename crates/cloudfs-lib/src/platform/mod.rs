/// Host platforms with a known way to open a URL in the default browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOS,
    Linux,
    Windows,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::MacOS => write!(f, "macOS"),
            Platform::Linux => write!(f, "Linux"),
            Platform::Windows => write!(f, "Windows"),
        }
    }
}

impl Platform {
    /// Program and arguments that open `url` with the desktop's default handler.
    pub fn open_command(self, url: &str) -> (&'static str, Vec<String>) {
        match self {
            Platform::MacOS => ("open", vec![url.to_string()]),
            Platform::Linux => ("xdg-open", vec![url.to_string()]),
            // `start` treats the first quoted argument as a window title.
            Platform::Windows => (
                "cmd",
                vec!["/C".into(), "start".into(), String::new(), url.replace('&', "^&")],
            ),
        }
    }
}

/// The platform detected at compile time. Other Unix systems are treated as Linux.
pub fn current_platform() -> Platform {
    if cfg!(target_os = "macos") {
        Platform::MacOS
    } else if cfg!(target_os = "windows") {
        Platform::Windows
    } else {
        Platform::Linux
    }
}
