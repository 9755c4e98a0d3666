pub mod ctr;
pub mod features;
pub mod registry;

pub use ctr::{sigmoid, CtrModel, Prediction, TrainedModel, TrainingParams, TrainingSummary};
pub use features::{FeatureExtractor, FeatureKind, FeatureSchema};
pub use registry::{ModelRegistry, ModelSnapshot};
