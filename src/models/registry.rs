use crate::models::config::ModelConfig;
use crate::models::detector::{DetectionEngine, EngineFactory};
use crate::models::labels::LabelMap;
use crate::models::{CONFIG_FILE, GRAPH_FILE, LABEL_LIST_FILE, LABEL_MAP_FILE};
use crate::utils::error::ServiceError;
use crate::Result;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 已加载到内存的模型
pub struct LoadedModel {
    pub name: String,
    pub path: PathBuf,
    pub config: ModelConfig,
    pub labels: LabelMap,
    /// 冻结图与标签文件的内容哈希
    pub hash: String,
    engine: Arc<dyn DetectionEngine>,
}

impl LoadedModel {
    pub fn engine(&self) -> &dyn DetectionEngine {
        self.engine.as_ref()
    }

    /// 标签名称到标签哈希的映射
    pub fn label_hashes(&self) -> BTreeMap<String, String> {
        self.labels
            .iter()
            .map(|(_, label)| {
                let mut hasher = Sha256::new();
                hasher.update(self.hash.as_bytes());
                hasher.update(b":");
                hasher.update(label.as_bytes());
                (label.to_string(), format!("{:x}", hasher.finalize()))
            })
            .collect()
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("hash", &self.hash)
            .field("labels", &self.labels.len())
            .finish()
    }
}

/// 单个模型的加载结果
#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 模型注册表
///
/// 进程启动时创建，通过 `/load` 填充，随进程结束销毁。
/// 同名模型的加载通过按名称的异步锁串行化，保证每个名称最多加载一次。
pub struct ModelRegistry {
    models_dir: PathBuf,
    factory: Arc<dyn EngineFactory>,
    loaded: RwLock<HashMap<String, Arc<LoadedModel>>>,
    load_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            models_dir: models_dir.into(),
            factory,
            loaded: RwLock::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// 列出模型目录下的所有模型，不触发加载
    pub fn list_models(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in fs::read_dir(&self.models_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if is_valid_name(&name) => names.push(name),
                Ok(_) => {}
                Err(raw) => tracing::warn!("Skipping non UTF-8 model folder: {:?}", raw),
            }
        }

        names.sort();
        Ok(names)
    }

    /// 模型目录是否存在于磁盘上
    pub fn exists_on_disk(&self, name: &str) -> bool {
        is_valid_name(name) && self.models_dir.join(name).is_dir()
    }

    fn loaded_hash(&self, name: &str) -> Option<String> {
        let loaded = self.loaded.read();
        loaded.get(name).map(|model| model.hash.clone())
    }

    /// 加载模型，已加载时直接返回已有哈希
    pub async fn load(&self, name: &str) -> Result<String> {
        self.load_with(name, false).await
    }

    /// 加载模型；`force` 为 true 时重新从磁盘读取并替换
    pub async fn load_with(&self, name: &str, force: bool) -> Result<String> {
        if !force {
            if let Some(hash) = self.loaded_hash(name) {
                return Ok(hash);
            }
        }

        // 未知名称不修改注册表
        if !self.exists_on_disk(name) {
            return Err(ServiceError::NotFound(name.to_string()));
        }

        let lock = {
            let mut locks = self.load_locks.lock();
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        let _guard = lock.lock().await;

        // 等待锁期间可能已被其他请求加载
        if !force {
            if let Some(hash) = self.loaded_hash(name) {
                return Ok(hash);
            }
        }

        let dir = self.models_dir.join(name);
        let model_name = name.to_string();
        let factory = Arc::clone(&self.factory);

        tracing::info!("Loading model '{}' from {}", name, dir.display());
        let model = tokio::task::spawn_blocking(move || load_from_disk(&model_name, &dir, factory))
            .await
            .map_err(|e| ServiceError::Internal(format!("Model loading task failed: {}", e)))??;

        let hash = model.hash.clone();
        self.loaded
            .write()
            .insert(name.to_string(), Arc::new(model));

        tracing::info!("Model '{}' loaded, hash={}", name, hash);
        Ok(hash)
    }

    /// 加载全部模型，单个失败不影响其余模型
    pub async fn load_all(&self) -> Result<BTreeMap<String, LoadOutcome>> {
        let mut outcomes = BTreeMap::new();

        for name in self.list_models()? {
            let outcome = match self.load(&name).await {
                Ok(hash) => LoadOutcome {
                    success: true,
                    hash: Some(hash),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!("Failed to load model '{}': {}", name, e);
                    LoadOutcome {
                        success: false,
                        hash: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.insert(name, outcome);
        }

        Ok(outcomes)
    }

    /// 获取已加载的模型
    pub fn get(&self, name: &str) -> Result<Arc<LoadedModel>> {
        if let Some(model) = self.loaded.read().get(name) {
            return Ok(Arc::clone(model));
        }

        if self.exists_on_disk(name) {
            Err(ServiceError::NotLoaded(name.to_string()))
        } else {
            Err(ServiceError::NotFound(name.to_string()))
        }
    }

    /// 按名称或哈希查找已加载的模型
    pub fn resolve(&self, name_or_hash: &str) -> Result<Arc<LoadedModel>> {
        {
            let loaded = self.loaded.read();
            if let Some(model) = loaded.get(name_or_hash) {
                return Ok(Arc::clone(model));
            }
            // 多个目录内容相同时哈希相同，取名称最小者保证结果确定
            if let Some(model) = loaded
                .values()
                .filter(|model| model.hash == name_or_hash)
                .min_by(|a, b| a.name.cmp(&b.name))
            {
                return Ok(Arc::clone(model));
            }
        }

        self.get(name_or_hash)
    }

    /// 已加载模型的名称和哈希
    pub fn loaded_models(&self) -> BTreeMap<String, String> {
        self.loaded
            .read()
            .iter()
            .map(|(name, model)| (name.clone(), model.hash.clone()))
            .collect()
    }
}

/// 模型名称只能是单层目录名
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
}

fn require_file(dir: &Path, file: &str) -> Result<PathBuf> {
    let path = dir.join(file);
    if path.is_file() {
        Ok(path)
    } else {
        Err(ServiceError::NotFound(format!(
            "required file {} is missing",
            path.display()
        )))
    }
}

/// 从磁盘读取配置、标签和冻结图（阻塞操作）
fn load_from_disk(name: &str, dir: &Path, factory: Arc<dyn EngineFactory>) -> Result<LoadedModel> {
    if !dir.is_dir() {
        return Err(ServiceError::NotFound(name.to_string()));
    }

    let config = ModelConfig::from_path(&require_file(dir, CONFIG_FILE)?)?;
    let graph_path = require_file(dir, GRAPH_FILE)?;

    let (label_bytes, labels) = if dir.join(LABEL_MAP_FILE).is_file() {
        let bytes = fs::read(dir.join(LABEL_MAP_FILE))?;
        let labels = LabelMap::from_pbtxt(&String::from_utf8_lossy(&bytes))?;
        (bytes, labels)
    } else if dir.join(LABEL_LIST_FILE).is_file() {
        let bytes = fs::read(dir.join(LABEL_LIST_FILE))?;
        let labels = LabelMap::from_lines(&String::from_utf8_lossy(&bytes));
        (bytes, labels)
    } else {
        return Err(ServiceError::NotFound(format!(
            "no label file ({} or {}) in {}",
            LABEL_MAP_FILE,
            LABEL_LIST_FILE,
            dir.display()
        )));
    };

    if labels.len() != config.number_of_classes {
        tracing::warn!(
            "Model '{}' declares {} classes but label file has {}",
            name,
            config.number_of_classes,
            labels.len()
        );
    }

    let graph = fs::read(&graph_path)?;

    let mut hasher = Sha256::new();
    hasher.update(&graph);
    hasher.update(&label_bytes);
    let hash = format!("{:x}", hasher.finalize());

    let engine = factory.build(&graph, &config)?;

    Ok(LoadedModel {
        name: name.to_string(),
        path: dir.to_path_buf(),
        config,
        labels,
        hash,
        engine,
    })
}
