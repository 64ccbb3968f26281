use std::path::{Path, PathBuf};
use std::str::FromStr;

use facet::Facet;

use crate::error::TemplateError;

pub const DEFAULT_QEMU_IMG_BIN: &str = "qemu-img";
pub const DEFAULT_SNIPPETS_DIR: &str = "/var/lib/vz/snippets";
pub const DEFAULT_CORES: u32 = 2;
pub const DEFAULT_MEMORY_MB: u64 = 1024;
pub const DEFAULT_BRIDGE: &str = "vmbr0";

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default)]
    pub global_settings: GlobalSettings,
    #[facet(default)]
    pub template_settings: TemplateSettings,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct GlobalSettings {
    #[facet(default)]
    pub qm_bin: String,
    pub qemu_img_bin: Option<String>,
    pub snippets_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct TemplateSettings {
    #[facet(default)]
    pub image: String,
    pub vm_id: Option<u32>,
    #[facet(default)]
    pub vm_size: String,
    #[facet(default)]
    pub vm_name: String,
    #[facet(default)]
    pub ci_file: String,
    #[facet(default)]
    pub storage_pool: String,
    #[facet(default)]
    pub vm_user: String,
    #[facet(default)]
    pub ssh_key: String,
    pub vm_cores: Option<u32>,
    pub vm_memory: Option<u64>,
    pub vm_agent: Option<u8>,
    pub vm_net_tag: Option<u16>,
    pub vm_net_bridge: Option<String>,
    /// Debug-level logs, same as `-v`. An explicit `-q` still wins.
    #[facet(default)]
    pub debug: bool,
}

/// Everything needed to build one template, resolved from the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub qm_bin: String,
    pub qemu_img_bin: String,
    pub snippets_dir: PathBuf,
    pub image: PathBuf,
    pub vm_id: u32,
    pub vm_size: String,
    pub vm_name: String,
    pub ci_file: PathBuf,
    /// File name of `ci_file`, as it will appear in snippet storage.
    pub snippet_name: String,
    pub storage_pool: String,
    pub vm_user: String,
    pub ssh_key: PathBuf,
    pub cores: u32,
    pub memory_mb: u64,
    pub agent: bool,
    pub net_tag: Option<u16>,
    pub net_bridge: String,
    pub debug: bool,
}

// ── overrides ─────────────────────────────────────────────

/// A `key=value` pair from `--override`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub key: String,
    pub value: String,
}

impl FromStr for Override {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("empty key in '{s}'"));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

impl std::fmt::Display for Override {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

fn parse_number<T: FromStr>(value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a valid number"))
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("'{other}' is not a boolean (use true/false or 1/0)")),
    }
}

impl Config {
    /// Apply one override. Keys may be bare (`vm_id`) or qualified with their
    /// section (`template_settings.vm_id`).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let (section, field) = match key.split_once('.') {
            Some((section, field)) => (Some(section), field),
            None => (None, key),
        };

        let global = matches!(section, None | Some("global_settings"));
        let template = matches!(section, None | Some("template_settings"));
        let g = &mut self.global_settings;
        let t = &mut self.template_settings;

        match field {
            "qm_bin" if global => g.qm_bin = value.to_string(),
            "qemu_img_bin" if global => g.qemu_img_bin = Some(value.to_string()),
            "snippets_dir" if global => g.snippets_dir = Some(value.to_string()),
            "image" if template => t.image = value.to_string(),
            "vm_id" if template => t.vm_id = Some(parse_number(value)?),
            "vm_size" if template => t.vm_size = value.to_string(),
            "vm_name" if template => t.vm_name = value.to_string(),
            "ci_file" if template => t.ci_file = value.to_string(),
            "storage_pool" if template => t.storage_pool = value.to_string(),
            "vm_user" if template => t.vm_user = value.to_string(),
            "ssh_key" if template => t.ssh_key = value.to_string(),
            "vm_cores" if template => t.vm_cores = Some(parse_number(value)?),
            "vm_memory" if template => t.vm_memory = Some(parse_number(value)?),
            "vm_agent" if template => t.vm_agent = Some(parse_flag(value)? as u8),
            "vm_net_tag" if template => t.vm_net_tag = Some(parse_number(value)?),
            "vm_net_bridge" if template => t.vm_net_bridge = Some(value.to_string()),
            "debug" if template => t.debug = parse_flag(value)?,
            _ => return Err(format!("unknown setting '{key}'")),
        }
        Ok(())
    }
}

// ── LoadedConfig ──────────────────────────────────────────

/// Parsed config plus the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: Config,
}

impl LoadedConfig {
    /// Merge `--override` pairs into the loaded config. Later pairs win.
    pub fn apply_overrides(&mut self, overrides: &[Override]) -> Result<(), TemplateError> {
        for o in overrides {
            self.config
                .set(&o.key, &o.value)
                .map_err(|message| TemplateError::InvalidOverride {
                    entry: o.to_string(),
                    message,
                })?;
            tracing::debug!(key = %o.key, value = %o.value, "applied override");
        }
        Ok(())
    }

    /// Directory relative paths in the config are resolved against.
    fn base_dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    fn resolve_path(&self, value: &str) -> PathBuf {
        let p = Path::new(value);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir().join(p)
        }
    }

    /// Check that every required key is present and build the request.
    ///
    /// All missing keys are reported at once.
    pub fn resolve(&self) -> Result<ProvisioningRequest, TemplateError> {
        let g = &self.config.global_settings;
        let t = &self.config.template_settings;

        let mut missing = Vec::new();
        let required = [
            ("global_settings.qm_bin", g.qm_bin.as_str()),
            ("template_settings.image", t.image.as_str()),
            ("template_settings.vm_size", t.vm_size.as_str()),
            ("template_settings.vm_name", t.vm_name.as_str()),
            ("template_settings.ci_file", t.ci_file.as_str()),
            ("template_settings.storage_pool", t.storage_pool.as_str()),
            ("template_settings.vm_user", t.vm_user.as_str()),
            ("template_settings.ssh_key", t.ssh_key.as_str()),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                missing.push(key.to_string());
            }
        }
        if t.vm_id.is_none() {
            missing.push("template_settings.vm_id".to_string());
        }
        if !missing.is_empty() {
            missing.sort();
            return Err(TemplateError::MissingSettings {
                path: self.path.display().to_string(),
                keys: missing,
            });
        }

        let ci_file = self.resolve_path(&t.ci_file);
        let snippet_name = ci_file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| TemplateError::Validation {
                message: format!("ci_file '{}' does not name a file", t.ci_file),
            })?;

        Ok(ProvisioningRequest {
            qm_bin: g.qm_bin.clone(),
            qemu_img_bin: g
                .qemu_img_bin
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_QEMU_IMG_BIN.to_string()),
            snippets_dir: g
                .snippets_dir
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNIPPETS_DIR)),
            image: self.resolve_path(&t.image),
            // checked above
            vm_id: t.vm_id.unwrap_or_default(),
            vm_size: t.vm_size.clone(),
            vm_name: t.vm_name.clone(),
            ci_file,
            snippet_name,
            storage_pool: t.storage_pool.clone(),
            vm_user: t.vm_user.clone(),
            ssh_key: self.resolve_path(&t.ssh_key),
            cores: t.vm_cores.unwrap_or(DEFAULT_CORES),
            memory_mb: t.vm_memory.unwrap_or(DEFAULT_MEMORY_MB),
            agent: t.vm_agent.is_none_or(|a| a != 0),
            net_tag: t.vm_net_tag,
            net_bridge: t
                .vm_net_bridge
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_BRIDGE.to_string()),
            debug: t.debug,
        })
    }
}

// ── public API ────────────────────────────────────────────

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, TemplateError> {
    facet_yaml::from_str(contents).map_err(|e| TemplateError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

pub fn load_config(path: &Path) -> Result<LoadedConfig, TemplateError> {
    let contents = std::fs::read_to_string(path).map_err(|source| TemplateError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    let config = parse_config(&contents, path)?;

    Ok(LoadedConfig {
        path: path.to_path_buf(),
        config,
    })
}

#[cfg(test)]
pub mod tests {
    use super::*;

    const FULL_YAML: &str = r#"
global_settings:
  qm_bin: /usr/sbin/qm

template_settings:
  image: images/noble.img
  vm_id: 9001
  vm_size: "10G"
  vm_name: ubuntu-tmpl
  ci_file: snippets/ubuntu.yaml
  storage_pool: local
  vm_user: root
  ssh_key: /root/.ssh/id_ed25519.pub
  vm_cores: 4
  vm_memory: 4096
  vm_agent: 0
  vm_net_tag: 20
  vm_net_bridge: vmbr2
  debug: true
"#;

    fn loaded(yaml: &str) -> LoadedConfig {
        LoadedConfig {
            path: PathBuf::from("/etc/ptemplate/settings.yml"),
            config: parse_config(yaml, Path::new("settings.yml")).unwrap(),
        }
    }

    /// A fully resolved request with fixed, absolute paths.
    pub fn test_request() -> ProvisioningRequest {
        ProvisioningRequest {
            qm_bin: "/usr/sbin/qm".into(),
            qemu_img_bin: "qemu-img".into(),
            snippets_dir: PathBuf::from("/var/lib/vz/snippets"),
            image: PathBuf::from("/images/noble.img"),
            vm_id: 9001,
            vm_size: "10G".into(),
            vm_name: "ubuntu-tmpl".into(),
            ci_file: PathBuf::from("/srv/snippets/ubuntu.yaml"),
            snippet_name: "ubuntu.yaml".into(),
            storage_pool: "local".into(),
            vm_user: "root".into(),
            ssh_key: PathBuf::from("/keys/id.pub"),
            cores: 2,
            memory_mb: 2048,
            agent: true,
            net_tag: Some(20),
            net_bridge: "vmbr0".into(),
            debug: false,
        }
    }

    #[test]
    fn parse_full_config() {
        let config = parse_config(FULL_YAML, Path::new("settings.yml")).unwrap();
        assert_eq!(config.global_settings.qm_bin, "/usr/sbin/qm");
        assert_eq!(config.template_settings.vm_id, Some(9001));
        assert_eq!(config.template_settings.vm_size, "10G");
        assert_eq!(config.template_settings.vm_net_tag, Some(20));
        assert!(config.template_settings.debug);
    }

    #[test]
    fn resolve_full_config() {
        let req = loaded(FULL_YAML).resolve().unwrap();
        assert_eq!(req.qm_bin, "/usr/sbin/qm");
        assert_eq!(req.qemu_img_bin, DEFAULT_QEMU_IMG_BIN);
        assert_eq!(req.snippets_dir, PathBuf::from(DEFAULT_SNIPPETS_DIR));
        assert_eq!(req.image, PathBuf::from("/etc/ptemplate/images/noble.img"));
        assert_eq!(req.ci_file, PathBuf::from("/etc/ptemplate/snippets/ubuntu.yaml"));
        assert_eq!(req.snippet_name, "ubuntu.yaml");
        assert_eq!(req.ssh_key, PathBuf::from("/root/.ssh/id_ed25519.pub"));
        assert_eq!(req.cores, 4);
        assert_eq!(req.memory_mb, 4096);
        assert!(!req.agent);
        assert_eq!(req.net_tag, Some(20));
        assert_eq!(req.net_bridge, "vmbr2");
        assert!(req.debug);
    }

    #[test]
    fn optional_settings_take_defaults() {
        let yaml = r#"
global_settings:
  qm_bin: qm
template_settings:
  image: /img/noble.img
  vm_id: 100
  vm_size: "8G"
  vm_name: noble
  ci_file: /ci/vendor.yaml
  storage_pool: local
  vm_user: ubuntu
  ssh_key: /keys/id.pub
"#;
        let req = loaded(yaml).resolve().unwrap();
        assert_eq!(req.cores, DEFAULT_CORES);
        assert_eq!(req.memory_mb, DEFAULT_MEMORY_MB);
        assert!(req.agent);
        assert_eq!(req.net_tag, None);
        assert_eq!(req.net_bridge, DEFAULT_BRIDGE);
        assert!(!req.debug);
    }

    #[test]
    fn missing_qm_bin_is_reported() {
        let yaml = FULL_YAML.replace("  qm_bin: /usr/sbin/qm\n", "");
        let err = loaded(&yaml).resolve().unwrap_err();
        match err {
            TemplateError::MissingSettings { keys, .. } => {
                assert_eq!(keys, vec!["global_settings.qm_bin".to_string()]);
            }
            other => panic!("expected MissingSettings, got {other:?}"),
        }
    }

    #[test]
    fn all_missing_keys_reported_together() {
        let err = loaded("global_settings: {}\n").resolve().unwrap_err();
        match err {
            TemplateError::MissingSettings { keys, .. } => {
                assert_eq!(keys.len(), 9);
                assert!(keys.contains(&"template_settings.vm_id".to_string()));
                assert!(keys.contains(&"template_settings.ssh_key".to_string()));
            }
            other => panic!("expected MissingSettings, got {other:?}"),
        }
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let mut cfg = loaded(FULL_YAML);
        cfg.path = PathBuf::from("settings.yml");
        let req = cfg.resolve().unwrap();
        assert_eq!(req.image, PathBuf::from("./images/noble.img"));
    }

    #[test]
    fn override_parses_key_value() {
        let o: Override = "vm_name=noble=1".parse().unwrap();
        assert_eq!(o.key, "vm_name");
        assert_eq!(o.value, "noble=1");
        assert!("no-equals".parse::<Override>().is_err());
        assert!("=value".parse::<Override>().is_err());
    }

    #[test]
    fn overrides_replace_loaded_values() {
        let mut cfg = loaded(FULL_YAML);
        cfg.apply_overrides(&[
            "vm_id=9100".parse().unwrap(),
            "template_settings.vm_name=jammy".parse().unwrap(),
            "global_settings.qm_bin=/opt/qm".parse().unwrap(),
            "vm_agent=true".parse().unwrap(),
        ])
        .unwrap();
        let req = cfg.resolve().unwrap();
        assert_eq!(req.vm_id, 9100);
        assert_eq!(req.vm_name, "jammy");
        assert_eq!(req.qm_bin, "/opt/qm");
        assert!(req.agent);
    }

    #[test]
    fn later_override_wins() {
        let mut cfg = loaded(FULL_YAML);
        cfg.apply_overrides(&["vm_cores=1".parse().unwrap(), "vm_cores=8".parse().unwrap()])
            .unwrap();
        assert_eq!(cfg.resolve().unwrap().cores, 8);
    }

    #[test]
    fn override_can_fill_missing_key() {
        let yaml = FULL_YAML.replace("  qm_bin: /usr/sbin/qm\n", "");
        let mut cfg = loaded(&yaml);
        cfg.apply_overrides(&["qm_bin=/usr/sbin/qm".parse().unwrap()])
            .unwrap();
        assert!(cfg.resolve().is_ok());
    }

    #[test]
    fn unknown_override_key_rejected() {
        let mut cfg = loaded(FULL_YAML);
        let err = cfg
            .apply_overrides(&["vm_colour=blue".parse().unwrap()])
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidOverride { .. }));
    }

    #[test]
    fn override_in_wrong_section_rejected() {
        let mut cfg = loaded(FULL_YAML);
        assert!(cfg
            .apply_overrides(&["global_settings.vm_id=1".parse().unwrap()])
            .is_err());
    }

    #[test]
    fn non_numeric_override_rejected() {
        let mut cfg = loaded(FULL_YAML);
        let err = cfg
            .apply_overrides(&["vm_id=abc".parse().unwrap()])
            .unwrap_err();
        assert!(err.to_string().contains("not a valid number"));
    }

    #[test]
    fn missing_file_is_load_error() {
        let err = load_config(Path::new("/nonexistent/settings.yml")).unwrap_err();
        assert!(matches!(err, TemplateError::ConfigLoad { .. }));
    }
}
