//! Pipeline instance domain types

use serde::{Deserialize, Serialize};

use crate::PipelineId;

/// Deployable log-shipping process definition
///
/// Received by value for each operation; the persistent record belongs to the
/// metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInstance {
    pub id: PipelineId,
    pub name: String,
    /// Module tag, used to name the deployment directory
    pub module: String,
    /// Local path of the package tarball uploaded during initialization
    pub package_path: String,
    /// Main pipeline configuration text
    pub config_content: String,
    #[serde(default)]
    pub jvm_options: Option<String>,
    #[serde(default)]
    pub system_config: Option<String>,
    /// Absolute deployment directory, overriding the generated one
    #[serde(default)]
    pub deploy_path: Option<String>,
}

impl PipelineInstance {
    /// Resolves the deployment directory for a machine login
    ///
    /// A relative base directory is placed under the user's home directory.
    pub fn deploy_dir(&self, base_dir: &str, username: &str) -> String {
        if let Some(path) = self.deploy_path.as_deref().filter(|p| !p.trim().is_empty()) {
            return path.trim_end_matches('/').to_string();
        }

        let base = base_dir.trim_end_matches('/');
        let base = if base.starts_with('/') {
            base.to_string()
        } else {
            format!("/home/{}/{}", username, base)
        };

        format!("{}/{}-{}", base, self.module, self.id)
    }

    /// File name of the uploaded package
    pub fn package_file_name(&self) -> &str {
        self.package_path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("package.tar.gz")
    }
}

/// Configuration files pushed to deployed instances by an update
///
/// Only the files that are `Some` are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub config_content: Option<String>,
    #[serde(default)]
    pub jvm_options: Option<String>,
    #[serde(default)]
    pub system_config: Option<String>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.config_content.is_none() && self.jvm_options.is_none() && self.system_config.is_none()
    }

    /// The instance as the update wants it written
    ///
    /// Files the update leaves out come back blank, so they are not planned.
    pub fn staged(&self, pipeline: &PipelineInstance) -> PipelineInstance {
        PipelineInstance {
            config_content: self.config_content.clone().unwrap_or_default(),
            jvm_options: self.jvm_options.clone(),
            system_config: self.system_config.clone(),
            ..pipeline.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> PipelineInstance {
        PipelineInstance {
            id: 7,
            name: "nginx-logs".to_string(),
            module: "nginx".to_string(),
            package_path: "/opt/packages/logstash-8.10.tar.gz".to_string(),
            config_content: "input {}".to_string(),
            jvm_options: None,
            system_config: None,
            deploy_path: None,
        }
    }

    #[test]
    fn test_deploy_dir_absolute_base() {
        let pipeline = instance();
        assert_eq!(pipeline.deploy_dir("/opt/convoy/", "ops"), "/opt/convoy/nginx-7");
    }

    #[test]
    fn test_deploy_dir_relative_base_goes_under_home() {
        let pipeline = instance();
        assert_eq!(pipeline.deploy_dir("convoy", "ops"), "/home/ops/convoy/nginx-7");
    }

    #[test]
    fn test_deploy_dir_override() {
        let mut pipeline = instance();
        pipeline.deploy_path = Some("/data/shipper/".to_string());
        assert_eq!(pipeline.deploy_dir("convoy", "ops"), "/data/shipper");
    }

    #[test]
    fn test_package_file_name() {
        let mut pipeline = instance();
        assert_eq!(pipeline.package_file_name(), "logstash-8.10.tar.gz");

        pipeline.package_path = "relative.tar.gz".to_string();
        assert_eq!(pipeline.package_file_name(), "relative.tar.gz");
    }

    #[test]
    fn test_config_update_stages_only_supplied_files() {
        let update = ConfigUpdate {
            jvm_options: Some("-Xmx2g".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
        assert!(ConfigUpdate::default().is_empty());

        let mut pipeline = instance();
        pipeline.system_config = Some("pipeline.workers: 2".to_string());
        let staged = update.staged(&pipeline);
        assert_eq!(staged.id, pipeline.id);
        assert_eq!(staged.config_content, "");
        assert_eq!(staged.jvm_options.as_deref(), Some("-Xmx2g"));
        assert_eq!(staged.system_config, None);
    }
}
