//! Engine backed by an external executable.
//!
//! Each call gets its own working directory under a shared scratch root
//! (`<tmp>/vision-localize-server/<task-id>`). The query image is written there as
//! `query.jpg`, the executable is run with the calibration, map and hint arguments, and the
//! working directory is removed once the process exits.
//!
//! Command line
//! -----------------
//! ```text
//! <program> [configured args...]
//!     --user-id <id> --k-mat-file <file> --dist-mat-file <file> --scale-image <f>
//!     --map-id <id> --sfm-data-dir <dir> --match-dir <dir> --a-mat-file <file>
//!     --image <working dir>/query.jpg
//!     [--return-keypoint] [--return-time]
//!     [--beacon <signal>] [--center <cx>,<cy>,<cz> --radius <r>]
//! ```
//!
//! The executable prints one JSON [`RawEstimate`] on stdout. Empty output or an empty `pose`
//! means the image could not be localized. A non-zero exit status is an engine failure.
//!
//! With [`ExternalCommandEngine::with_timeout`], a process still running at the deadline is
//! killed and the call fails.
use std::{
    fs,
    io::Read,
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{EngineOutcome, EngineRequest, LocalizeEngine, RawEstimate};
use crate::{
    constants::TMP_DIR_NAME, image_source::unique_task_id, localize_errors::LocalizeError,
};

#[derive(Debug)]
pub struct ExternalCommandEngine {
    program: Utf8PathBuf,
    args: Vec<String>,
    work_root: Utf8PathBuf,
    work_root_ready: OnceCell<()>,
    timeout: Option<Duration>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-call working directory, removed on drop.
struct TaskDir {
    path: Utf8PathBuf,
}

impl Drop for TaskDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("deleted working folder : {}", self.path),
            Err(err) => warn!("failed to delete working folder {} : {err}", self.path),
        }
    }
}

impl ExternalCommandEngine {
    /// Create an engine running `program` with `args` prepended to the per-request arguments.
    ///
    /// The scratch root defaults to `<system tmp>/vision-localize-server`; it is created on the
    /// first call, not here.
    pub fn new(program: impl Into<Utf8PathBuf>, args: Vec<String>) -> Self {
        let tmp = Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .unwrap_or_else(|_| Utf8PathBuf::from("tmp"));
        ExternalCommandEngine {
            program: program.into(),
            args,
            work_root: tmp.join(TMP_DIR_NAME),
            work_root_ready: OnceCell::new(),
            timeout: None,
        }
    }

    /// Kill the engine process when it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_work_root(mut self, work_root: impl Into<Utf8PathBuf>) -> Self {
        self.work_root = work_root.into();
        self.work_root_ready = OnceCell::new();
        self
    }

    fn work_root(&self) -> Result<&Utf8Path, LocalizeError> {
        self.work_root_ready.get_or_try_init(|| {
            if !self.work_root.is_dir() {
                fs::create_dir_all(&self.work_root)?;
                info!(
                    "working directory does not exist, created folder : {}",
                    self.work_root
                );
            }
            Ok::<(), LocalizeError>(())
        })?;
        Ok(&self.work_root)
    }

    fn create_task_dir(&self) -> Result<TaskDir, LocalizeError> {
        let path = self.work_root()?.join(unique_task_id());
        fs::create_dir(&path).map_err(|err| {
            LocalizeError::EngineFailure(format!("failed to create working folder: {err}"))
        })?;
        debug!("created working folder : {path}");
        Ok(TaskDir { path })
    }

    /// Per-request arguments, in the documented order.
    pub(crate) fn request_args(request: &EngineRequest, image_path: &Utf8Path) -> Vec<String> {
        let user = &request.user;
        let map = &request.map;
        let mut args = vec![
            "--user-id".to_string(),
            user.name.clone(),
            "--k-mat-file".to_string(),
            user.k_mat_file.to_string(),
            "--dist-mat-file".to_string(),
            user.dist_mat_file.to_string(),
            "--scale-image".to_string(),
            user.scale_image.to_string(),
            "--map-id".to_string(),
            map.name.clone(),
            "--sfm-data-dir".to_string(),
            map.sfm_data_dir.to_string(),
            "--match-dir".to_string(),
            map.match_dir.to_string(),
            "--a-mat-file".to_string(),
            map.a_mat_file.to_string(),
            "--image".to_string(),
            image_path.to_string(),
        ];
        if request.diagnostics.keypoints {
            args.push("--return-keypoint".into());
        }
        if request.diagnostics.timing {
            args.push("--return-time".into());
        }
        if let Some(beacon) = &request.hints.beacon {
            args.push("--beacon".into());
            args.push(beacon.clone());
        }
        if let Some(spatial) = &request.hints.spatial {
            let c = spatial.center;
            args.push("--center".into());
            args.push(format!("{},{},{}", c.x, c.y, c.z));
            args.push("--radius".into());
            args.push(spatial.radius.to_string());
        }
        args
    }

    /// Wait for the child, killing it once the deadline passes.
    fn wait(&self, child: &mut Child) -> Result<ExitStatus, LocalizeError> {
        let Some(limit) = self.timeout else {
            return Ok(child.wait()?);
        };
        let deadline = Instant::now() + limit;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!("engine still running after {limit:?}, killing pid {}", child.id());
                if let Err(err) = child.kill().and_then(|()| child.wait().map(|_| ())) {
                    warn!("failed to kill engine process : {err}");
                }
                return Err(LocalizeError::EngineFailure(format!(
                    "engine killed after {limit:?}"
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Read a child pipe to the end on its own thread, so a full pipe never blocks the child.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(err) = pipe.read_to_end(&mut buf) {
                warn!("failed to read engine output : {err}");
            }
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

impl LocalizeEngine for ExternalCommandEngine {
    fn localize(&self, request: &EngineRequest) -> Result<EngineOutcome, LocalizeError> {
        let task_dir = self.create_task_dir()?;
        let image_path = task_dir.path.join("query.jpg");
        fs::write(&image_path, &request.image)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(Self::request_args(request, &image_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                warn!("cannot run {} : {err}", self.program);
                LocalizeError::EngineFailure("cannot start engine process".into())
            })?;
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let status = self.wait(&mut child)?;
        let stdout = collect(stdout_reader);
        let stderr = collect(stderr_reader);
        drop(task_dir);

        if !status.success() {
            warn!("engine stderr : {}", String::from_utf8_lossy(&stderr).trim());
            return Err(LocalizeError::EngineFailure(format!(
                "engine exited with {status}"
            )));
        }

        let stdout = String::from_utf8_lossy(&stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(EngineOutcome::NoEstimate);
        }
        let raw: RawEstimate = serde_json::from_str(stdout).map_err(|err| {
            LocalizeError::EngineFailure(format!("malformed engine output: {err}"))
        })?;
        if raw.pose.is_empty() {
            return Ok(EngineOutcome::NoEstimate);
        }
        Ok(EngineOutcome::Estimate(raw))
    }
}

#[cfg(test)]
mod external_command_test {
    use nalgebra::Vector3;

    use super::*;
    use crate::engine::{engine_test::request_for, DiagnosticsFlags, SpatialConstraint};

    fn scratch(name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .unwrap()
            .join(format!("vls-engine-test-{name}-{}", std::process::id()))
    }

    fn shell_engine(script: &str, root: &Utf8Path) -> ExternalCommandEngine {
        ExternalCommandEngine::new("sh", vec!["-c".into(), script.into(), "engine".into()])
            .with_work_root(root)
    }

    #[test]
    fn test_request_args_forward_only_supplied_hints() {
        let mut request = request_for(DiagnosticsFlags::default());
        let args = ExternalCommandEngine::request_args(&request, Utf8Path::new("/w/query.jpg"));
        assert!(!args.contains(&"--beacon".to_string()));
        assert!(!args.contains(&"--center".to_string()));
        assert!(!args.contains(&"--return-time".to_string()));

        request.hints.spatial = Some(SpatialConstraint {
            center: Vector3::new(1.0, 2.5, -3.0),
            radius: 4.0,
        });
        request.diagnostics.keypoints = true;
        let args = ExternalCommandEngine::request_args(&request, Utf8Path::new("/w/query.jpg"));
        let tail: Vec<&str> = args.iter().rev().take(5).rev().map(String::as_str).collect();
        assert_eq!(
            tail,
            ["--return-keypoint", "--center", "1,2.5,-3", "--radius", "4"]
        );
        assert!(!args.contains(&"--beacon".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_localize_parses_stdout() {
        let root = scratch("ok");
        let engine = shell_engine(r#"echo '{"pose":[1,2,3,1,0,0,0,1,0,0,0,1]}'"#, &root);
        let outcome = engine.localize(&request_for(DiagnosticsFlags::default())).unwrap();
        let EngineOutcome::Estimate(raw) = outcome else {
            panic!("expected an estimate");
        };
        assert_eq!(raw.pose[..3], [1.0, 2.0, 3.0]);

        // working directories are cleaned up after each call
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
        fs::remove_dir_all(&root).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_localize_empty_output_is_no_estimate() {
        let root = scratch("empty");
        let engine = shell_engine(r#"echo '{"pose":[]}'"#, &root);
        assert_eq!(
            engine.localize(&request_for(DiagnosticsFlags::default())).unwrap(),
            EngineOutcome::NoEstimate
        );
        let engine = shell_engine("true", &root);
        assert_eq!(
            engine.localize(&request_for(DiagnosticsFlags::default())).unwrap(),
            EngineOutcome::NoEstimate
        );
        fs::remove_dir_all(&root).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_localize_non_zero_exit_is_failure() {
        let root = scratch("fail");
        let engine = shell_engine("echo oops >&2; exit 3", &root);
        let err = engine
            .localize(&request_for(DiagnosticsFlags::default()))
            .unwrap_err();
        assert!(matches!(err, LocalizeError::EngineFailure(_)));
        fs::remove_dir_all(&root).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_localize_kills_process_past_timeout() {
        let root = scratch("timeout");
        let marker = root.join("finished");
        fs::create_dir_all(&root).unwrap();
        let engine = shell_engine(&format!("sleep 2; touch {marker}"), &root)
            .with_timeout(Duration::from_millis(100));

        let start = Instant::now();
        let err = engine
            .localize(&request_for(DiagnosticsFlags::default()))
            .unwrap_err();
        assert_eq!(
            err,
            LocalizeError::EngineFailure("engine killed after 100ms".into())
        );
        assert!(start.elapsed() < Duration::from_secs(1));

        // the killed script never reaches its last command
        thread::sleep(Duration::from_millis(2500));
        assert!(!marker.exists());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
        fs::remove_dir_all(&root).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_localize_within_timeout_reads_large_output() {
        let root = scratch("large");
        let script = r#"printf '{"pose":[1,2,3,1,0,0,0,1,0,0,0,1],"inliers":['; i=0; while [ $i -lt 20000 ]; do printf '%d,' $i; i=$((i+1)); done; printf '0]}'"#;
        let engine = shell_engine(script, &root).with_timeout(Duration::from_secs(30));
        let outcome = engine.localize(&request_for(DiagnosticsFlags::default())).unwrap();
        let EngineOutcome::Estimate(raw) = outcome else {
            panic!("expected an estimate");
        };
        assert_eq!(raw.inliers.map(|i| i.len()), Some(20001));
        fs::remove_dir_all(&root).unwrap();
    }
}
