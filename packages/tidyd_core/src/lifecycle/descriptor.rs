use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything the host supervisor needs to know about the daemon: identity,
/// what to launch, restart policy, and the endpoint names the daemon serves.
/// Written as a whole on install and regenerated on reinstall, never edited
/// in place.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub identifier: String,
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
    pub keep_alive: bool,
    pub run_at_load: bool,
    pub endpoints: BTreeMap<String, bool>,
}

impl ServiceDescriptor {
    /// Descriptor for the standard daemon layout: launched at login, kept
    /// alive, serving the primary endpoint under its own identifier.
    pub fn for_daemon(identifier: &str, executable: PathBuf, log_dir: &Path) -> Self {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(identifier.to_string(), true);

        ServiceDescriptor {
            identifier: identifier.to_string(),
            executable,
            arguments: vec!["run".to_string()],
            stdout_log: log_dir.join("daemon.log"),
            stderr_log: log_dir.join("daemon.err"),
            keep_alive: true,
            run_at_load: true,
            endpoints,
        }
    }

    /// File name the supervisor expects inside its registration directory.
    pub fn file_name(&self) -> String {
        #[cfg(target_os = "macos")]
        {
            format!("{}.plist", self.identifier)
        }

        #[cfg(not(target_os = "macos"))]
        {
            format!("{}.service", self.identifier)
        }
    }

    /// Render the descriptor in the format of the platform supervisor.
    pub fn render(&self) -> String {
        #[cfg(target_os = "macos")]
        {
            self.render_launchd_plist()
        }

        #[cfg(not(target_os = "macos"))]
        {
            self.render_systemd_unit()
        }
    }

    pub fn render_launchd_plist(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n");
        out.push_str("<plist version=\"1.0\">\n<dict>\n");

        out.push_str("\t<key>Label</key>\n");
        out.push_str(&format!("\t<string>{}</string>\n", xml_escape(&self.identifier)));

        out.push_str("\t<key>ProgramArguments</key>\n\t<array>\n");
        out.push_str(&format!(
            "\t\t<string>{}</string>\n",
            xml_escape(&self.executable.to_string_lossy())
        ));
        for argument in &self.arguments {
            out.push_str(&format!("\t\t<string>{}</string>\n", xml_escape(argument)));
        }
        out.push_str("\t</array>\n");

        out.push_str("\t<key>RunAtLoad</key>\n");
        out.push_str(if self.run_at_load { "\t<true/>\n" } else { "\t<false/>\n" });
        out.push_str("\t<key>KeepAlive</key>\n");
        out.push_str(if self.keep_alive { "\t<true/>\n" } else { "\t<false/>\n" });

        out.push_str("\t<key>StandardOutPath</key>\n");
        out.push_str(&format!(
            "\t<string>{}</string>\n",
            xml_escape(&self.stdout_log.to_string_lossy())
        ));
        out.push_str("\t<key>StandardErrorPath</key>\n");
        out.push_str(&format!(
            "\t<string>{}</string>\n",
            xml_escape(&self.stderr_log.to_string_lossy())
        ));

        // launchd ignores keys it does not recognize; clients read this
        // mapping back to discover which endpoint names are served.
        out.push_str("\t<key>RegisteredEndpoints</key>\n\t<dict>\n");
        for (endpoint, enabled) in &self.endpoints {
            out.push_str(&format!("\t\t<key>{}</key>\n", xml_escape(endpoint)));
            out.push_str(if *enabled { "\t\t<true/>\n" } else { "\t\t<false/>\n" });
        }
        out.push_str("\t</dict>\n");

        out.push_str("</dict>\n</plist>\n");
        out
    }

    pub fn render_systemd_unit(&self) -> String {
        let mut out = String::new();
        out.push_str("[Unit]\n");
        out.push_str(&format!("Description={}\n", self.identifier));
        out.push('\n');

        out.push_str("[Service]\n");
        let mut exec = unit_word(&self.executable.to_string_lossy());
        for argument in &self.arguments {
            exec.push(' ');
            exec.push_str(&unit_word(argument));
        }
        out.push_str(&format!("ExecStart={}\n", exec));
        if self.keep_alive {
            out.push_str("Restart=always\n");
        }
        out.push_str(&format!(
            "StandardOutput=append:{}\n",
            self.stdout_log.to_string_lossy()
        ));
        out.push_str(&format!(
            "StandardError=append:{}\n",
            self.stderr_log.to_string_lossy()
        ));
        out.push('\n');

        // systemd skips sections prefixed with X-; clients read this back to
        // discover which endpoint names are served.
        out.push_str("[X-Tidyd]\n");
        for (endpoint, enabled) in &self.endpoints {
            out.push_str(&format!("Endpoint={}={}\n", endpoint, enabled));
        }

        if self.run_at_load {
            out.push('\n');
            out.push_str("[Install]\nWantedBy=default.target\n");
        }
        out
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unit_word(value: &str) -> String {
    if value.chars().any(char::is_whitespace) {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::*;

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::for_daemon(
            "io.tidyd.daemon",
            PathBuf::from("/home/dev/.local/share/tidyd/bin/tidyd"),
            &PathBuf::from("/home/dev/.local/share/tidyd/logs"),
        )
    }

    #[test]
    fn launchd_plist_registers_endpoint() {
        let plist = descriptor().render_launchd_plist();

        assert!(plist.contains("<key>Label</key>\n\t<string>io.tidyd.daemon</string>"));
        assert!(plist.contains("<string>/home/dev/.local/share/tidyd/bin/tidyd</string>"));
        assert!(plist.contains("<string>run</string>"));
        assert!(plist.contains("<key>RunAtLoad</key>\n\t<true/>"));
        assert!(plist.contains("<key>KeepAlive</key>\n\t<true/>"));
        assert!(plist.contains("<key>RegisteredEndpoints</key>"));
        assert!(plist.contains("<key>io.tidyd.daemon</key>\n\t\t<true/>"));
    }

    #[test]
    fn launchd_plist_escapes_xml() {
        let mut descriptor = descriptor();
        descriptor.arguments.push("--tag=a&b".to_string());

        let plist = descriptor.render_launchd_plist();
        assert!(plist.contains("<string>--tag=a&amp;b</string>"));
    }

    #[test]
    fn systemd_unit_layout() {
        let unit = descriptor().render_systemd_unit();

        assert!(unit.contains("ExecStart=/home/dev/.local/share/tidyd/bin/tidyd run\n"));
        assert!(unit.contains("Restart=always\n"));
        assert!(unit.contains("StandardError=append:/home/dev/.local/share/tidyd/logs/daemon.err\n"));
        assert!(unit.contains("Endpoint=io.tidyd.daemon=true\n"));
        assert!(unit.contains("[Install]\nWantedBy=default.target\n"));
    }

    #[test]
    fn systemd_unit_quotes_paths_with_spaces() {
        let mut descriptor = descriptor();
        descriptor.executable = PathBuf::from("/Users/dev/Application Support/tidyd");

        let unit = descriptor.render_systemd_unit();
        assert!(unit.contains("ExecStart=\"/Users/dev/Application Support/tidyd\" run\n"));
    }

    #[test]
    fn one_shot_descriptor_omits_restart_and_install() {
        let mut descriptor = descriptor();
        descriptor.keep_alive = false;
        descriptor.run_at_load = false;

        let unit = descriptor.render_systemd_unit();
        assert!(!unit.contains("Restart="));
        assert!(!unit.contains("[Install]"));
    }
}
