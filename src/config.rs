use crate::utils::error::ServiceError;
use crate::Result;
use std::path::PathBuf;

/// OCR文本行检测模型文件名
pub const DET_MODEL_FILE: &str = "det.onnx";
/// OCR识别模型文件名
pub const REC_MODEL_FILE: &str = "rec.onnx";
/// OCR字典文件名
pub const DICT_FILE: &str = "dict.txt";

#[derive(Debug, Clone)]
pub struct Config {
    /// 服务器绑定地址
    pub bind_addr: String,

    /// 检测模型目录，每个子目录是一个模型
    pub models_dir: PathBuf,

    /// OCR识别模型目录（可选）
    pub ocr_models_dir: Option<PathBuf>,

    /// 工作线程数量
    pub workers: usize,

    /// 启动时加载所有模型
    pub preload: bool,

    /// 开发模式
    pub dev_mode: bool,

    /// ONNX Runtime配置
    pub onnx_config: OnnxConfig,

    /// 服务器配置
    pub server_config: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// CPU线程数
    pub intra_threads: usize,

    /// 优化级别 (0-3)
    pub optimization_level: i32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 请求超时时间（秒）
    pub request_timeout: u64,

    /// 最大请求体大小（字节）
    pub max_request_size: usize,

    /// 单张图片最大字节数
    pub max_image_size: usize,
}

impl Config {
    pub fn new(
        bind_addr: String,
        models_dir: impl Into<PathBuf>,
        ocr_models_dir: Option<PathBuf>,
        workers: Option<usize>,
        dev_mode: bool,
    ) -> Result<Self> {
        let models_dir = models_dir.into();

        // 模型目录不存在属于启动配置错误
        if !models_dir.is_dir() {
            return Err(ServiceError::Config(format!(
                "Models directory does not exist: {}",
                models_dir.display()
            )));
        }

        let cpu_cores = num_cpus::get();
        let workers = workers.filter(|w| *w > 0).unwrap_or(cpu_cores);

        let onnx_config = OnnxConfig {
            intra_threads: (cpu_cores * 3 / 4).max(1), // 使用75%的CPU核心
            optimization_level: 3,
        };

        let server_config = ServerConfig {
            request_timeout: if dev_mode { 300 } else { 60 }, // 开发模式更长超时
            max_request_size: 100 * 1024 * 1024, // 100MB，批量上传需要更大的请求体
            max_image_size: 50 * 1024 * 1024,    // 50MB
        };

        Ok(Self {
            bind_addr,
            models_dir,
            ocr_models_dir,
            workers,
            preload: false,
            dev_mode,
            onnx_config,
            server_config,
        })
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    /// 获取文本行检测模型路径（可选）
    pub fn det_model_path(&self) -> Option<PathBuf> {
        self.ocr_models_dir.as_deref().map(|dir| dir.join(DET_MODEL_FILE))
    }

    /// 获取识别模型路径
    pub fn rec_model_path(&self) -> Option<PathBuf> {
        self.ocr_models_dir.as_deref().map(|dir| dir.join(REC_MODEL_FILE))
    }

    /// 获取字典文件路径
    pub fn dict_path(&self) -> Option<PathBuf> {
        self.ocr_models_dir.as_deref().map(|dir| dir.join(DICT_FILE))
    }

    /// OCR模型是否齐全
    pub fn has_ocr_models(&self) -> bool {
        match (self.rec_model_path(), self.dict_path()) {
            (Some(rec), Some(dict)) => rec.exists() && dict.exists(),
            _ => false,
        }
    }
}
