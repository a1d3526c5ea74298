//! Config Renderer
//!
//! Builds the server's `config.json` from the configuration parameters and
//! decides the file resources that carry it.
//!
//! # Set-if-present
//!
//! Every category is an `Option`. A category appears in the emitted
//! document only when the caller supplied it; there are no sentinel
//! defaults that could leak into the file. The normalizer supplies
//! `storage` and `listener` defaults, so an unconfigured module renders
//! exactly those two keys.
//!
//! # Resources
//!
//! | Resource          | Emitted when |
//! |-------------------|--------------|
//! | config directory  | archive installs (packages own their config dir) |
//! | `config.json`     | `manage_config_file` |
//! | storage directory | `manage_storage_dir` and a `file`/`raft` backend with a `path` |
//!
//! The storage directory is read from the merged document, so a `storage`
//! block in `extra_config` wins over the `storage` parameter.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::error::{PlanError, Result};
use crate::params::ConfigParameters;
use crate::plan::{Resource, ResourceId, ResourcePlan};
use crate::types::FileMode;

/// A free-form configuration block (`{"file": {"path": "/data"}}`)
pub type Section = serde_json::Map<String, Value>;

/// File name of the rendered configuration inside `config_dir`
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Storage backends whose `path` is a local directory
const LOCAL_STORAGE_BACKENDS: &[&str] = &["file", "raft"];

/// One listener block or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Listener {
    Single(Section),
    Multiple(Vec<Section>),
}

/// The server configuration document.
///
/// Serialized keys are sorted, so identical documents always render to
/// identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<Section>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listener: Option<Listener>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ha_storage: Option<Section>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seal: Option<Section>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Section>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_lease_ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lease_ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_mlock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_addr: Option<String>,
    /// Additional top-level keys, merged last (they win on collision)
    #[serde(skip)]
    pub extra: Section,
}

impl ConfigDocument {
    /// The document as a JSON object, with `extra` merged in.
    pub fn to_value(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            for (key, extra) in &self.extra {
                map.insert(key.clone(), extra.clone());
            }
        }
        Ok(value)
    }

    /// Pretty-printed JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(&self.to_value()?)?;
        json.push('\n');
        Ok(json)
    }

    /// Top-level keys present in the rendered document, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(match self.to_value()? {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        })
    }
}

/// Output of the config renderer
#[derive(Debug, Clone)]
pub struct RenderedConfig {
    pub document: ConfigDocument,
    /// Exact bytes of `config.json`
    pub content: String,
    pub path: PathBuf,
    pub directory: Option<ResourceId>,
    pub file: Option<ResourceId>,
    pub storage_dir: Option<ResourceId>,
    pub plan: ResourcePlan,
}

/// Build the document by the set-if-present rule.
pub fn build_document(params: &ConfigParameters) -> ConfigDocument {
    ConfigDocument {
        storage: params.storage.clone(),
        listener: params.listener.clone(),
        ha_storage: params.ha_storage.clone(),
        seal: params.seal.clone(),
        disable_cache: params.disable_cache,
        telemetry: params.telemetry.clone(),
        default_lease_ttl: params.default_lease_ttl.clone(),
        max_lease_ttl: params.max_lease_ttl.clone(),
        disable_mlock: params.disable_mlock,
        ui: params.enable_ui,
        api_addr: params.api_addr.clone(),
        extra: params.extra_config.clone(),
    }
}

/// Local directory used by a `file` or `raft` storage backend.
pub fn storage_path(storage: &Section) -> Option<PathBuf> {
    LOCAL_STORAGE_BACKENDS.iter().find_map(|backend| {
        storage
            .get(*backend)?
            .get("path")?
            .as_str()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    })
}

/// Render the configuration document and plan its file resources.
pub fn render_config(params: &ConfigParameters) -> Result<RenderedConfig> {
    let document = build_document(params);
    let content = document.to_json()?;
    let path = params.config_dir.join(CONFIG_FILE_NAME);

    tracing::debug!(
        "Config document keys: {:?}, file managed: {}",
        document.keys()?,
        params.manage_config_file
    );

    let mut plan = ResourcePlan::new();

    let directory = if params.manage_config_dir {
        Some(plan.insert(Resource::Directory {
            path: params.config_dir.clone(),
            owner: params.user.clone(),
            group: params.group.clone(),
            mode: FileMode::DIRECTORY,
            purge: params.purge_config_dir,
            recurse: params.purge_config_dir,
        })?)
    } else {
        None
    };

    let file = if params.manage_config_file {
        Some(plan.insert(Resource::File {
            title: path.display().to_string(),
            path: path.clone(),
            owner: params.user.clone(),
            group: params.group.clone(),
            mode: params.config_mode,
            content: Some(content.clone()),
        })?)
    } else {
        None
    };

    if let (Some(directory), Some(file)) = (&directory, &file) {
        plan.before(directory, file);
    }

    let merged_storage = match document.to_value()? {
        Value::Object(mut map) => match map.remove("storage") {
            Some(Value::Object(storage)) => Some(storage),
            _ => None,
        },
        _ => None,
    };

    let storage_dir = match merged_storage.as_ref().and_then(storage_path) {
        Some(storage) if params.manage_storage_dir && !storage.is_absolute() => {
            return Err(PlanError::invalid(
                "storage",
                format!("storage path '{}' is not absolute", storage.display()),
            ));
        }
        Some(storage)
            if params.manage_storage_dir
                && params.manage_config_dir
                && storage == params.config_dir =>
        {
            return Err(PlanError::invalid(
                "config_dir, storage",
                format!("both manage the directory {}", storage.display()),
            ));
        }
        Some(storage) if params.manage_storage_dir => Some(plan.insert(Resource::Directory {
            path: storage,
            owner: params.user.clone(),
            group: params.group.clone(),
            mode: FileMode::DIRECTORY,
            purge: false,
            recurse: false,
        })?),
        Some(_) => None,
        None => {
            if params.manage_storage_dir {
                tracing::warn!(
                    "manage_storage_dir is set but the storage backend has no local path"
                );
            }
            None
        }
    };

    Ok(RenderedConfig {
        document,
        content,
        path,
        directory,
        file,
        storage_dir,
        plan,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn section(value: Value) -> Section {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    fn test_params() -> ConfigParameters {
        ConfigParameters {
            storage: Some(section(json!({"file": {"path": "/data/openbao"}}))),
            listener: Some(Listener::Single(section(
                json!({"tcp": {"address": "127.0.0.1:8200", "tls_disable": 1}}),
            ))),
            ha_storage: None,
            seal: None,
            disable_cache: None,
            telemetry: None,
            default_lease_ttl: None,
            max_lease_ttl: None,
            disable_mlock: None,
            enable_ui: None,
            api_addr: None,
            extra_config: Section::new(),
            config_dir: PathBuf::from("/etc/openbao"),
            config_mode: FileMode::CONFIG,
            manage_config_file: true,
            manage_config_dir: true,
            purge_config_dir: true,
            manage_storage_dir: false,
            user: "openbao".to_string(),
            group: "openbao".to_string(),
        }
    }

    #[test]
    fn test_unconfigured_document_has_only_storage_and_listener() {
        let document = build_document(&test_params());
        let keys = document.keys().expect("keys"); // test: known-good input
        assert_eq!(keys, vec!["listener".to_string(), "storage".to_string()]);
    }

    #[test]
    fn test_every_category_is_emitted_when_set() {
        let mut params = test_params();
        params.ha_storage = Some(section(json!({"consul": {"address": "127.0.0.1:8500"}})));
        params.seal = Some(section(json!({"transit": {"key_name": "autounseal"}})));
        params.disable_cache = Some(false);
        params.telemetry = Some(section(json!({"statsite_address": "127.0.0.1:8125"})));
        params.default_lease_ttl = Some("720h".to_string());
        params.max_lease_ttl = Some("8760h".to_string());
        params.disable_mlock = Some(true);
        params.enable_ui = Some(true);
        params.api_addr = Some("https://bao.example.com:8200".to_string());

        let value = build_document(&params).to_value().expect("value"); // test: known-good input
        assert_eq!(value["disable_cache"], json!(false));
        assert_eq!(value["disable_mlock"], json!(true));
        assert_eq!(value["ui"], json!(true));
        assert_eq!(value["api_addr"], json!("https://bao.example.com:8200"));
        assert_eq!(value["max_lease_ttl"], json!("8760h"));
        assert_eq!(value["seal"]["transit"]["key_name"], json!("autounseal"));
        assert!(value.get("enable_ui").is_none());
    }

    #[test]
    fn test_multiple_listeners_keep_order() {
        let mut params = test_params();
        params.listener = Some(Listener::Multiple(vec![
            section(json!({"tcp": {"address": "127.0.0.1:8200"}})),
            section(json!({"tcp": {"address": "0.0.0.0:8200"}})),
        ]));

        let value = build_document(&params).to_value().expect("value"); // test: known-good input
        assert_eq!(value["listener"][0]["tcp"]["address"], json!("127.0.0.1:8200"));
        assert_eq!(value["listener"][1]["tcp"]["address"], json!("0.0.0.0:8200"));
    }

    #[test]
    fn test_extra_config_merges_last() {
        let mut params = test_params();
        params.extra_config = section(json!({
            "cluster_name": "primary",
            "storage": {"raft": {"path": "/srv/raft"}}
        }));

        let value = build_document(&params).to_value().expect("value"); // test: known-good input
        assert_eq!(value["cluster_name"], json!("primary"));
        assert_eq!(value["storage"], json!({"raft": {"path": "/srv/raft"}}));
    }

    #[test]
    fn test_rendered_json_is_pretty_and_sorted() {
        let rendered = render_config(&test_params()).expect("render failed"); // test: known-good input
        let expected = "{\n  \"listener\": {\n    \"tcp\": {\n      \"address\": \"127.0.0.1:8200\",\n      \"tls_disable\": 1\n    }\n  },\n  \"storage\": {\n    \"file\": {\n      \"path\": \"/data/openbao\"\n    }\n  }\n}\n";
        assert_eq!(rendered.content, expected);
    }

    #[test]
    fn test_config_file_metadata() {
        let mut params = test_params();
        params.config_mode = "0700".parse().expect("valid mode"); // test: known-good input
        let rendered = render_config(&params).expect("render failed"); // test: known-good input

        assert_eq!(rendered.path, PathBuf::from("/etc/openbao/config.json"));
        let file = rendered
            .plan
            .find_path("/etc/openbao/config.json")
            .expect("config file planned"); // test: known-good input
        match file {
            Resource::File { owner, group, mode, content, .. } => {
                assert_eq!(owner, "openbao");
                assert_eq!(group, "openbao");
                assert_eq!(mode.to_string(), "0700");
                assert_eq!(content.as_deref(), Some(rendered.content.as_str()));
            }
            other => panic!("unexpected resource {}", other),
        }
    }

    #[test]
    fn test_config_dir_precedes_config_file() {
        let rendered = render_config(&test_params()).expect("render failed"); // test: known-good input
        let dir = rendered.directory.expect("config dir planned"); // test: known-good input
        let file = rendered.file.expect("config file planned"); // test: known-good input
        assert!(rendered.plan.edge(&dir, &file).is_some());

        match rendered.plan.get(&dir) {
            Some(Resource::Directory { purge, recurse, .. }) => assert!(*purge && *recurse),
            other => panic!("unexpected resource {:?}", other),
        }
    }

    #[test]
    fn test_unmanaged_config_file_is_absent() {
        let mut params = test_params();
        params.manage_config_file = false;
        let rendered = render_config(&params).expect("render failed"); // test: known-good input
        assert!(rendered.file.is_none());
        assert!(rendered.plan.find_path("/etc/openbao/config.json").is_none());
        // The document is still rendered for callers that ship it themselves
        assert!(rendered.content.contains("storage"));
    }

    #[test]
    fn test_storage_dir_for_file_and_raft() {
        let mut params = test_params();
        params.manage_storage_dir = true;
        let rendered = render_config(&params).expect("render failed"); // test: known-good input
        assert!(rendered.storage_dir.is_some());
        assert!(rendered.plan.find_path("/data/openbao").is_some());

        params.storage = Some(section(json!({"raft": {"path": "/data/raft", "node_id": "a"}})));
        let rendered = render_config(&params).expect("render failed"); // test: known-good input
        assert!(rendered.plan.find_path("/data/raft").is_some());
    }

    #[test]
    fn test_storage_dir_not_managed_by_default_or_for_remote_backends() {
        let rendered = render_config(&test_params()).expect("render failed"); // test: known-good input
        assert!(rendered.storage_dir.is_none());
        assert!(rendered.plan.find_path("/data/openbao").is_none());

        let mut params = test_params();
        params.manage_storage_dir = true;
        params.storage = Some(section(json!({"consul": {"address": "127.0.0.1:8500"}})));
        let rendered = render_config(&params).expect("render failed"); // test: known-good input
        assert!(rendered.storage_dir.is_none());
    }

    #[test]
    fn test_storage_dir_follows_extra_config_storage() {
        let mut params = test_params();
        params.manage_storage_dir = true;
        params
            .extra_config
            .insert("storage".to_string(), json!({"raft": {"path": "/srv/raft"}}));
        let rendered = render_config(&params).expect("render failed"); // test: known-good input

        assert!(rendered.plan.find_path("/srv/raft").is_some());
        assert!(rendered.plan.find_path("/data/openbao").is_none());
        assert!(rendered.content.contains("/srv/raft"));
    }

    #[test]
    fn test_relative_storage_path_is_rejected() {
        let mut params = test_params();
        params.manage_storage_dir = true;
        params.storage = Some(section(json!({"file": {"path": "data/openbao"}})));
        let err = render_config(&params).expect_err("relative path must fail"); // test: expected error
        assert!(matches!(err, PlanError::InvalidParameter { ref name, .. } if name == "storage"));

        // Unmanaged storage dirs are passed through untouched
        params.manage_storage_dir = false;
        assert!(render_config(&params).is_ok());
    }

    #[test]
    fn test_storage_in_config_dir_names_both_parameters() {
        let mut params = test_params();
        params.manage_storage_dir = true;
        params.storage = Some(section(json!({"file": {"path": "/etc/openbao"}})));
        match render_config(&params) {
            Err(PlanError::InvalidParameter { name, .. }) => assert_eq!(name, "config_dir, storage"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_storage_path_helper() {
        assert_eq!(
            storage_path(&section(json!({"file": {"path": "/data"}}))),
            Some(PathBuf::from("/data"))
        );
        assert_eq!(storage_path(&section(json!({"file": {}}))), None);
        assert_eq!(storage_path(&section(json!({"inmem": {}}))), None);
    }
}
