// Remote file copy
//
// The transfer stage pulls a replica from another host into the local staging
// directory. `ScpCopier` shells out to scp in batch mode; tests substitute
// their own `RemoteCopier`.

use std::path::Path;
use std::process::{Command, Stdio};

use regex::Regex;

use crate::error::{Result, XBakeError};
use crate::tools;

pub trait RemoteCopier: Send + Sync {
    /// Copy `remote_path` on `host` into the directory `dest_dir`.
    fn copy(&self, host: &str, remote_path: &str, dest_dir: &Path) -> Result<()>;
}

pub struct ScpCopier;

impl RemoteCopier for ScpCopier {
    fn copy(&self, host: &str, remote_path: &str, dest_dir: &Path) -> Result<()> {
        let source = format!("{}:{}", host, shell_quote(remote_path));
        log::debug!("scp -B -r {} {}", source, dest_dir.display());

        let output = Command::new(tools::scp_path())
            .arg("-B")
            .arg("-r")
            .arg(&source)
            .arg(dest_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| XBakeError::Transfer(format!("Failed to run scp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(XBakeError::Transfer(format!(
                "scp from {} exited with {}: {}",
                host,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Hostname to connect to for a replica-location key. Location keys store
/// `.` as `_`; with `host_only` only the first label of the FQDN is kept.
pub fn connect_host(location_key: &str, host_only: bool) -> String {
    let fqdn = location_key.replace('_', ".");
    if !host_only {
        return fqdn;
    }

    match Regex::new(r"^([^.]+)\.") {
        Ok(re) => re
            .captures(&fqdn)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or(fqdn),
        Err(_) => fqdn,
    }
}

/// Quote a path for the remote shell scp hands it to
pub fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}
