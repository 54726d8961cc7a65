// Process, service and network probes shared by the host environments

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;

/// True if `pgrep -f -- <name>` finds a matching command line outside our own
/// process lineage.
///
/// dd-configure and the shell that launched it may carry `name` in their
/// arguments, so their PIDs are discarded. A missing `pgrep` or any spawn
/// failure counts as "not running".
pub async fn process_running(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let output = Command::new("pgrep")
        .arg("-f")
        .arg("--")
        .arg(name)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!(process = %name, "pgrep unavailable: {}", e);
            return false;
        }
    };

    // pgrep exits 1 when nothing matched
    if !output.status.success() {
        return false;
    }

    let lineage = own_lineage();
    let matched = parse_pids(&String::from_utf8_lossy(&output.stdout));
    let others: Vec<u32> = matched
        .into_iter()
        .filter(|pid| !lineage.contains(pid))
        .collect();

    if others.is_empty() {
        tracing::debug!(process = %name, "pgrep only matched dd-configure's own process lineage");
        return false;
    }

    tracing::debug!(process = %name, pids = ?others, "process found");
    true
}

/// PIDs printed by pgrep, one per line
pub(crate) fn parse_pids(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// This process, its parent, and further ancestors where `/proc` allows
pub(crate) fn own_lineage() -> Vec<u32> {
    let mut lineage = vec![std::process::id()];

    #[cfg(unix)]
    {
        let mut pid = nix::unistd::getppid().as_raw() as u32;
        while pid > 1 && !lineage.contains(&pid) {
            lineage.push(pid);
            match parent_of(pid) {
                Some(parent) => pid = parent,
                None => break,
            }
        }
    }

    lineage
}

/// Parent PID from `/proc/<pid>/stat`; `None` without procfs
#[cfg(unix)]
fn parent_of(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}

/// True if PowerShell's `Get-Service` knows a service called `name`.
pub async fn service_exists(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let status = Command::new("powershell")
        .arg("-NoProfile")
        .arg("-NonInteractive")
        .arg("-Command")
        .arg(get_service_script(name))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) => status.success(),
        Err(e) => {
            tracing::debug!(service = %name, "powershell unavailable: {}", e);
            false
        }
    }
}

/// PowerShell snippet that fails when the service is unknown
pub(crate) fn get_service_script(name: &str) -> String {
    // Single-quoted PowerShell strings escape quotes by doubling them
    format!(
        "Get-Service -Name '{}' -ErrorAction Stop | Out-Null",
        name.replace('\'', "''")
    )
}

/// True if a TCP connection to `host:port` is established within `timeout`.
///
/// Name resolution counts against the timeout. Refusals, DNS failures and
/// timeouts all answer `false`.
pub async fn can_connect(host: &str, port: u16, timeout: Duration) -> bool {
    if host.is_empty() {
        return false;
    }

    match completes_within(timeout, TcpStream::connect((host, port))).await {
        Ok(_stream) => true,
        Err(reason) => {
            tracing::debug!(host = %host, port, "connection failed: {}", reason);
            false
        }
    }
}

/// Run an I/O attempt, giving up once `timeout` has passed
pub(crate) async fn completes_within<T, F>(timeout: Duration, attempt: F) -> Result<T, String>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", timeout)),
    }
}
