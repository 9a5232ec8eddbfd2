pub mod config;
pub mod model_metadata;
pub mod model_storage;
pub mod tensor_roles;

pub use config::{AppConfig, DeviceType, PathSettings, PreprocessingSettings, TrainingSettings};
pub use model_metadata::ModelMetadata;
pub use model_storage::{
    checkpoint_archive_path, checkpoint_exists, load_checkpoint, load_metadata,
    print_metadata_info, save_checkpoint,
};
pub use tensor_roles::{Role, TensorRoles, TensorSpec};
