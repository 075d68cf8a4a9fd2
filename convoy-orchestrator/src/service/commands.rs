//! Step plans and remote shell commands
//!
//! Each operation expands into a fixed, ordered list of [`StepKind`]s per
//! machine. The functions here only build command text; running them is the
//! orchestrator's job.

use convoy_core::domain::lifecycle::OperationKind;
use convoy_core::domain::pipeline::PipelineInstance;
use std::fmt;
use std::time::Duration;

use crate::error::{OrchestratorError, Result};

/// One named unit of remote work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    CreateRemoteDir,
    UploadPackage,
    ExtractPackage,
    CreateConfig,
    UpdateJvmOptions,
    UpdateSystemConfig,
    StartProcess,
    VerifyProcess,
    StopProcess,
    ForceStopProcess,
    DeleteDirectory,
    UpdateMainConfig,
    RefreshConfig,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::CreateRemoteDir => "create-remote-dir",
            StepKind::UploadPackage => "upload-package",
            StepKind::ExtractPackage => "extract-package",
            StepKind::CreateConfig => "create-config",
            StepKind::UpdateJvmOptions => "update-jvm-options",
            StepKind::UpdateSystemConfig => "update-system-config",
            StepKind::StartProcess => "start-process",
            StepKind::VerifyProcess => "verify-process",
            StepKind::StopProcess => "stop-process",
            StepKind::ForceStopProcess => "force-stop-process",
            StepKind::DeleteDirectory => "delete-directory",
            StepKind::UpdateMainConfig => "update-main-config",
            StepKind::RefreshConfig => "refresh-config",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered steps every machine runs for an operation
///
/// For `UpdateConfig` the pipeline is the staged view of the update, so only
/// files with content get a step.
pub fn plan(operation: OperationKind, pipeline: &PipelineInstance) -> Vec<StepKind> {
    match operation {
        OperationKind::Initialize => {
            let mut steps = vec![
                StepKind::CreateRemoteDir,
                StepKind::UploadPackage,
                StepKind::ExtractPackage,
                StepKind::CreateConfig,
            ];
            steps.extend(optional_config_steps(pipeline));
            steps
        }
        OperationKind::Start => vec![StepKind::StartProcess, StepKind::VerifyProcess],
        OperationKind::Stop => vec![StepKind::StopProcess],
        OperationKind::ForceStop => vec![StepKind::ForceStopProcess],
        OperationKind::DeleteDirectory => vec![StepKind::DeleteDirectory],
        OperationKind::UpdateConfig => {
            let mut steps = Vec::new();
            if !pipeline.config_content.trim().is_empty() {
                steps.push(StepKind::UpdateMainConfig);
            }
            steps.extend(optional_config_steps(pipeline));
            steps
        }
        OperationKind::RefreshConfig => vec![StepKind::RefreshConfig],
    }
}

fn optional_config_steps(pipeline: &PipelineInstance) -> Vec<StepKind> {
    let mut steps = Vec::new();
    if has_content(&pipeline.jvm_options) {
        steps.push(StepKind::UpdateJvmOptions);
    }
    if has_content(&pipeline.system_config) {
        steps.push(StepKind::UpdateSystemConfig);
    }
    steps
}

fn has_content(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Quotes a value for a POSIX shell
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Paths of one deployment on one machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployLayout {
    dir: String,
    pipeline_id: i64,
    package_file: String,
}

impl DeployLayout {
    /// Resolves and checks the deployment directory for a machine login
    ///
    /// The directory is removed recursively by some steps, so it must be an
    /// absolute path at least two levels deep without parent references.
    pub fn resolve(pipeline: &PipelineInstance, base_dir: &str, username: &str) -> Result<Self> {
        let dir = pipeline.deploy_dir(base_dir, username);

        let depth = dir.split('/').filter(|c| !c.is_empty()).count();
        if !dir.starts_with('/') || depth < 2 || dir.split('/').any(|c| c == "..") {
            return Err(OrchestratorError::Validation(format!(
                "refusing to use deployment directory '{}' for pipeline {}",
                dir, pipeline.id
            )));
        }

        Ok(Self {
            dir,
            pipeline_id: pipeline.id,
            package_file: pipeline.package_file_name().to_string(),
        })
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn package_path(&self) -> String {
        format!("{}/{}", self.dir, self.package_file)
    }

    pub fn config_dir(&self) -> String {
        format!("{}/config", self.dir)
    }

    pub fn pipeline_config_path(&self) -> String {
        format!("{}/pipeline-{}.conf", self.config_dir(), self.pipeline_id)
    }

    pub fn jvm_options_path(&self) -> String {
        format!("{}/jvm.options", self.config_dir())
    }

    pub fn system_config_path(&self) -> String {
        format!("{}/logstash.yml", self.config_dir())
    }

    pub fn log_dir(&self) -> String {
        format!("{}/logs", self.dir)
    }

    pub fn pid_file(&self) -> String {
        format!("{}/logstash-{}.pid", self.dir, self.pipeline_id)
    }

    pub fn launcher_path(&self) -> String {
        format!("{}/start-logstash-{}.sh", self.dir, self.pipeline_id)
    }

    // =========================================================================
    // Initialize
    // =========================================================================

    /// Removes any previous deployment and recreates the directory
    pub fn create_dir(&self) -> String {
        let dir = quote(&self.dir);
        format!("rm -rf {dir} && mkdir -p {dir} && echo {dir}")
    }

    /// Writes stdin to the package file
    pub fn upload_package(&self) -> String {
        format!("cat > {}", quote(&self.package_path()))
    }

    /// Unpacks the package in place and checks for the launcher binary
    pub fn extract_package(&self) -> String {
        format!(
            "cd {dir} && tar -xzf {pkg} --strip-components=1 && rm -f {pkg} && \
             if [ ! -f bin/logstash ]; then echo 'bin/logstash not found after extraction' >&2; exit 1; fi && \
             echo extracted",
            dir = quote(&self.dir),
            pkg = quote(&self.package_file),
        )
    }

    /// Writes stdin to a file below the config directory
    pub fn write_config_file(&self, path: &str) -> String {
        format!(
            "mkdir -p {} && cat > {} && echo written",
            quote(&self.config_dir()),
            quote(path)
        )
    }

    // =========================================================================
    // Start
    // =========================================================================

    /// Shell script that launches the process in the background and records its pid
    pub fn launcher_script(&self) -> String {
        format!(
            "#!/bin/sh\n\
             cd {dir} || exit 1\n\
             nohup ./bin/logstash -f {config} --path.settings {settings} --path.logs {logs} \
             --path.data {dir}/data --log.level info --config.reload.automatic \
             > {logs}/logstash-{id}.out 2>&1 < /dev/null &\n\
             echo $! > {pid}\n",
            dir = quote(&self.dir),
            config = quote(&self.pipeline_config_path()),
            settings = quote(&self.config_dir()),
            logs = quote(&self.log_dir()),
            id = self.pipeline_id,
            pid = quote(&self.pid_file()),
        )
    }

    /// Writes the launcher script from stdin and makes it executable
    pub fn write_launcher(&self) -> String {
        let launcher = quote(&self.launcher_path());
        format!(
            "mkdir -p {logs} && cat > {launcher} && chmod +x {launcher}",
            logs = quote(&self.log_dir()),
        )
    }

    /// Starts the process unless the recorded pid is alive; prints the pid
    pub fn launch(&self) -> String {
        let pid = quote(&self.pid_file());
        format!(
            "if [ -f {pid} ] && ps -p \"$(cat {pid})\" > /dev/null 2>&1; then cat {pid}; exit 0; fi; \
             rm -f {pid} && {launcher} && sleep 1 && \
             if [ -s {pid} ]; then cat {pid}; else echo 'pid file was not written' >&2; exit 1; fi",
            launcher = quote(&self.launcher_path()),
        )
    }

    // =========================================================================
    // Stop and delete
    // =========================================================================

    /// Stops the process: graceful signal, bounded wait, then force kill
    ///
    /// A missing pid file and no known pid means the process is already gone.
    pub fn stop_process(&self, known_pid: Option<&str>, grace_period: Duration) -> String {
        let pid_file = quote(&self.pid_file());
        let fallback = known_pid
            .filter(|p| is_pid(p))
            .unwrap_or_default();
        format!(
            "pid=''; if [ -f {pid_file} ]; then pid=$(cat {pid_file}); fi; \
             if [ -z \"$pid\" ]; then pid='{fallback}'; fi; \
             if [ -z \"$pid\" ]; then echo 'not running'; exit 0; fi; \
             if ps -p \"$pid\" > /dev/null 2>&1; then \
               kill \"$pid\"; i=0; \
               while ps -p \"$pid\" > /dev/null 2>&1 && [ $i -lt {grace} ]; do sleep 1; i=$((i+1)); done; \
               if ps -p \"$pid\" > /dev/null 2>&1; then kill -9 \"$pid\"; sleep 1; fi; \
               if ps -p \"$pid\" > /dev/null 2>&1; then echo \"process $pid still running\" >&2; exit 1; fi; \
             fi; \
             rm -f {pid_file}; echo \"stopped $pid\"",
            grace = grace_period.as_secs(),
        )
    }

    /// Kills the process at once; a missing process counts as stopped
    pub fn force_stop_process(&self, known_pid: Option<&str>) -> String {
        let pid_file = quote(&self.pid_file());
        let fallback = known_pid
            .filter(|p| is_pid(p))
            .unwrap_or_default();
        format!(
            "pid=''; if [ -f {pid_file} ]; then pid=$(cat {pid_file}); fi; \
             if [ -z \"$pid\" ]; then pid='{fallback}'; fi; \
             if [ -n \"$pid\" ] && ps -p \"$pid\" > /dev/null 2>&1; then kill -9 \"$pid\"; sleep 1; fi; \
             if [ -n \"$pid\" ] && ps -p \"$pid\" > /dev/null 2>&1; then echo \"process $pid still running\" >&2; exit 1; fi; \
             rm -f {pid_file}; echo \"killed ${{pid:-nothing}}\""
        )
    }

    /// Removes the deployment directory and checks it is gone
    pub fn delete_dir(&self) -> String {
        let dir = quote(&self.dir);
        format!(
            "rm -rf {dir}; if [ -e {dir} ]; then echo 'directory still present' >&2; exit 1; fi; echo removed"
        )
    }
}

/// Liveness probe printing `running` or `not_running`
pub fn probe_process(pid: &str) -> String {
    format!(
        "if ps -p {} > /dev/null 2>&1; then echo running; else echo not_running; fi",
        quote(pid)
    )
}

/// Whether a string looks like a process id
pub fn is_pid(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::domain::pipeline::ConfigUpdate;

    fn pipeline() -> PipelineInstance {
        PipelineInstance {
            id: 7,
            name: "nginx-access".to_string(),
            module: "nginx".to_string(),
            package_path: "/srv/packages/logstash-8.12.tar.gz".to_string(),
            config_content: "input {}".to_string(),
            jvm_options: None,
            system_config: None,
            deploy_path: None,
        }
    }

    #[test]
    fn test_initialize_plan_includes_optional_steps() {
        let mut pipeline = pipeline();
        assert_eq!(
            plan(OperationKind::Initialize, &pipeline),
            vec![
                StepKind::CreateRemoteDir,
                StepKind::UploadPackage,
                StepKind::ExtractPackage,
                StepKind::CreateConfig
            ]
        );

        pipeline.jvm_options = Some("-Xmx1g".to_string());
        pipeline.system_config = Some("  ".to_string());
        let steps = plan(OperationKind::Initialize, &pipeline);
        assert_eq!(steps.last(), Some(&StepKind::UpdateJvmOptions));
        assert_eq!(steps.len(), 5);
    }

    #[test]
    fn test_other_plans() {
        let pipeline = pipeline();
        assert_eq!(
            plan(OperationKind::Start, &pipeline),
            vec![StepKind::StartProcess, StepKind::VerifyProcess]
        );
        assert_eq!(plan(OperationKind::Stop, &pipeline), vec![StepKind::StopProcess]);
        assert_eq!(
            plan(OperationKind::DeleteDirectory, &pipeline),
            vec![StepKind::DeleteDirectory]
        );
        assert_eq!(
            plan(OperationKind::ForceStop, &pipeline),
            vec![StepKind::ForceStopProcess]
        );
        assert_eq!(
            plan(OperationKind::RefreshConfig, &pipeline),
            vec![StepKind::RefreshConfig]
        );
    }

    #[test]
    fn test_update_plan_follows_supplied_files() {
        let pipeline = pipeline();

        let update = ConfigUpdate {
            system_config: Some("pipeline.workers: 4".to_string()),
            ..Default::default()
        };
        assert_eq!(
            plan(OperationKind::UpdateConfig, &update.staged(&pipeline)),
            vec![StepKind::UpdateSystemConfig]
        );

        let update = ConfigUpdate {
            config_content: Some("input { beats {} }".to_string()),
            jvm_options: Some("-Xmx1g".to_string()),
            system_config: None,
        };
        assert_eq!(
            plan(OperationKind::UpdateConfig, &update.staged(&pipeline)),
            vec![StepKind::UpdateMainConfig, StepKind::UpdateJvmOptions]
        );
    }

    #[test]
    fn test_force_stop_skips_grace_period() {
        let layout = DeployLayout::resolve(&pipeline(), "convoy", "ops").unwrap();
        let command = layout.force_stop_process(Some("4242"));
        assert!(command.contains("pid='4242'"));
        assert!(command.contains("kill -9 \"$pid\""));
        assert!(!command.contains("kill \"$pid\""));
        assert!(command.contains("rm -f '/home/ops/convoy/nginx-7/logstash-7.pid'"));
    }

    #[test]
    fn test_layout_paths() {
        let layout = DeployLayout::resolve(&pipeline(), "convoy", "ops").unwrap();
        assert_eq!(layout.dir(), "/home/ops/convoy/nginx-7");
        assert_eq!(layout.package_path(), "/home/ops/convoy/nginx-7/logstash-8.12.tar.gz");
        assert_eq!(layout.pid_file(), "/home/ops/convoy/nginx-7/logstash-7.pid");
        assert_eq!(
            layout.pipeline_config_path(),
            "/home/ops/convoy/nginx-7/config/pipeline-7.conf"
        );
    }

    #[test]
    fn test_layout_rejects_dangerous_directories() {
        let mut pipeline = pipeline();
        for path in ["/", "/opt", "relative/dir", "/opt/../etc"] {
            pipeline.deploy_path = Some(path.to_string());
            assert!(
                DeployLayout::resolve(&pipeline, "convoy", "ops").is_err(),
                "{} should be rejected",
                path
            );
        }

        pipeline.deploy_path = Some("/opt/logstash/nginx".to_string());
        assert!(DeployLayout::resolve(&pipeline, "convoy", "ops").is_ok());
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_create_dir_cleans_first() {
        let layout = DeployLayout::resolve(&pipeline(), "/opt/convoy", "ops").unwrap();
        let command = layout.create_dir();
        let rm = command.find("rm -rf").unwrap();
        let mkdir = command.find("mkdir -p").unwrap();
        assert!(rm < mkdir);
        assert!(command.contains("'/opt/convoy/nginx-7'"));
    }

    #[test]
    fn test_stop_uses_known_pid_as_fallback() {
        let layout = DeployLayout::resolve(&pipeline(), "convoy", "ops").unwrap();
        let command = layout.stop_process(Some("4242"), Duration::from_secs(15));
        assert!(command.contains("pid='4242'"));
        assert!(command.contains("[ $i -lt 15 ]"));
        assert!(command.contains("kill -9"));

        let command = layout.stop_process(Some("42; rm -rf /"), Duration::from_secs(15));
        assert!(command.contains("pid=''"));
    }

    #[test]
    fn test_launcher_records_pid() {
        let layout = DeployLayout::resolve(&pipeline(), "convoy", "ops").unwrap();
        let script = layout.launcher_script();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("nohup ./bin/logstash -f '/home/ops/convoy/nginx-7/config/pipeline-7.conf'"));
        assert!(script.contains("echo $! > '/home/ops/convoy/nginx-7/logstash-7.pid'"));
    }

    #[test]
    fn test_is_pid() {
        assert!(is_pid("4242"));
        assert!(!is_pid(""));
        assert!(!is_pid("12a"));
    }
}
