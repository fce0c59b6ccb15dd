use std::fmt;

use crate::tensor::Tensor;

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.read_data();
        let mut dbg = f.debug_struct("Tensor");
        if let Some(name) = &guard.name {
            dbg.field("name", name);
        }
        dbg.field("shape", &guard.shape)
            .field("dtype", &guard.dtype())
            .field("data", &guard.buffer.to_f64_vec())
            .finish()
    }
}
