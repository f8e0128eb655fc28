use std::sync::Once;

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
use tracing::{debug, warn};

/// Preload libtorch's CUDA libraries so TorchScript modules can find their
/// kernels even when the binary was not linked against them directly.
pub(crate) fn load_torch_cuda_runtime() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let mut handles = Vec::new();
        for lib in ["libtorch_cuda.so", "libtorch_cuda_cu.so", "libtorch_cuda_cpp.so"] {
            match unsafe { Library::open(Some(lib), RTLD_NOW | RTLD_GLOBAL) } {
                Ok(handle) => {
                    debug!("loaded {lib}");
                    handles.push(handle);
                }
                Err(err) => warn!("failed to load {lib}: {err}"),
            }
        }
        // Handles must outlive every module load.
        Box::leak(Box::new(handles));
    });
}
