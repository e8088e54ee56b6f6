//! Bounded-wait prober.
//!
//! Every caller that must block until an endpoint becomes responsive
//! goes through [`apply_extension_delay`]: a fixed 20 ms poll against a
//! caller-supplied predicate, bounded by the configured autoload
//! timeout. The endpoint-active probe layers the platform existence and
//! handshake checks on top.

use argus_core::error::ExtensionError;
use std::time::Duration;

/// Millisecond latency between initializing manager probes.
pub const INITIALIZE_LATENCY_MS: u64 = 20;

/// Retry `predicate` every 20 ms until it succeeds, asks to stop, or the
/// deadline passes.
///
/// The effective timeout is clamped to at least ten poll periods so even
/// a zero-second configuration gets ten attempts. The predicate's last
/// result is returned as-is, whether it set `stop` or the deadline ran
/// out; there is no sleep after a success.
pub fn apply_extension_delay<F>(timeout_secs: u64, mut predicate: F) -> Result<(), ExtensionError>
where
    F: FnMut(&mut bool) -> Result<(), ExtensionError>,
{
    let period = Duration::from_millis(INITIALIZE_LATENCY_MS);
    let floor = period * 10;
    let timeout = Duration::from_secs(timeout_secs).max(floor);

    let mut waited = Duration::ZERO;
    loop {
        let mut stop = false;
        let result = predicate(&mut stop);
        if stop || result.is_ok() {
            return result;
        }

        waited += period;
        if waited >= timeout {
            return result;
        }
        std::thread::sleep(period);
    }
}

enum EndpointProbe {
    /// Addressable and answering.
    Ready,
    /// Not addressable at all.
    Missing,
    /// Addressable but the trial connection was turned away.
    Rejected,
}

/// Check that the endpoint at `addr` is addressable and answering.
///
/// On named-pipe platforms the pipe merely has to exist (busy is fine).
/// On socket platforms the path must exist, be writable, and accept a
/// trial connection; a refused connection is "not ready" and the prober
/// keeps polling. With `use_timeout` false the check collapses to a
/// single probe; with it true, the failure distinguishes an endpoint
/// that never appeared from one that kept turning the probe away.
pub fn extension_path_active(
    addr: &str,
    use_timeout: bool,
    timeout_secs: u64,
) -> Result<(), ExtensionError> {
    let mut rejected = false;
    let result = apply_extension_delay(timeout_secs, |stop| {
        match probe_endpoint(addr) {
            EndpointProbe::Ready => return Ok(()),
            EndpointProbe::Rejected => rejected = true,
            EndpointProbe::Missing => {}
        }
        // Only check once if this probe does not allow a timeout.
        if !use_timeout {
            *stop = true;
        }
        Err(ExtensionError::Endpoint(format!(
            "Extension endpoint not available: {addr}"
        )))
    });

    match result {
        Ok(()) => Ok(()),
        Err(err) if !use_timeout => Err(err),
        Err(_) if rejected => Err(ExtensionError::Endpoint(format!(
            "Extension endpoint rejected probe: {addr}"
        ))),
        Err(_) => Err(ExtensionError::Timeout(format!(
            "Timed out waiting for extension endpoint: {addr}"
        ))),
    }
}

#[cfg(windows)]
fn probe_endpoint(addr: &str) -> EndpointProbe {
    if crate::endpoint::named_pipe_exists(addr) {
        EndpointProbe::Ready
    } else {
        EndpointProbe::Missing
    }
}

#[cfg(not(windows))]
fn probe_endpoint(addr: &str) -> EndpointProbe {
    use crate::client::ManagerClient;
    use std::path::Path;

    let path = Path::new(addr);
    if !argus_core::fs::path_exists(path) || !argus_core::fs::is_writable(path) {
        return EndpointProbe::Missing;
    }
    // The path may exist without a connected manager or extension behind
    // it; only a live handshake counts.
    match ManagerClient::connect(addr) {
        Ok(_) => EndpointProbe::Ready,
        Err(_) => EndpointProbe::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prober_returns_first_success_without_sleeping_after() {
        let mut attempts = 0;
        let started = std::time::Instant::now();
        apply_extension_delay(3, |_| {
            attempts += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(attempts, 1);
        assert!(started.elapsed() < Duration::from_millis(INITIALIZE_LATENCY_MS));
    }

    #[test]
    fn stop_flag_short_circuits_with_the_last_failure() {
        let mut attempts = 0;
        let err = apply_extension_delay(3, |stop| {
            attempts += 1;
            *stop = true;
            Err(ExtensionError::Endpoint("not ready".into()))
        })
        .unwrap_err();
        assert_eq!(attempts, 1);
        assert!(matches!(err, ExtensionError::Endpoint(_)));
    }

    #[test]
    fn zero_timeout_still_gets_ten_attempts() {
        let mut attempts = 0;
        let err = apply_extension_delay(0, |_| {
            attempts += 1;
            Err(ExtensionError::Config("never ready".into()))
        })
        .unwrap_err();
        assert_eq!(attempts, 10);
        // The last predicate failure comes back verbatim.
        assert_eq!(err.to_string(), "never ready");
    }

    #[cfg(unix)]
    #[test]
    fn single_probe_of_a_dead_path_fails_fast() {
        let started = std::time::Instant::now();
        let err = extension_path_active("/nonexistent/argus.em", false, 3).unwrap_err();
        assert!(matches!(err, ExtensionError::Endpoint(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[test]
    fn timed_out_probe_reports_a_timeout() {
        let err = extension_path_active("/nonexistent/argus.em", true, 0).unwrap_err();
        assert!(matches!(err, ExtensionError::Timeout(_)));
    }

    #[cfg(unix)]
    #[test]
    fn stale_socket_file_reports_a_rejected_probe() {
        // A plain file where a socket should be: addressable, writable,
        // but nothing answers.
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("argus.em");
        std::fs::write(&stale, b"").unwrap();

        let err =
            extension_path_active(stale.to_str().unwrap(), true, 0).unwrap_err();
        assert!(err.to_string().contains("rejected probe"));
    }
}
