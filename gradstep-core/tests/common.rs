use gradstep_core::{DType, Parameter, Tensor};

// Helpers shared by the integration tests. Each test binary only uses a subset.

#[allow(dead_code)]
pub fn f32_param(name: &str, values: Vec<f32>) -> Parameter {
    let n = values.len();
    Parameter::new(name, Tensor::new(values, vec![n]).expect("Test tensor creation failed"))
}

#[allow(dead_code)]
pub fn half_param(name: &str, values: Vec<f32>, dtype: DType) -> Parameter {
    let n = values.len();
    let value = Tensor::new(values, vec![n])
        .and_then(|t| t.cast(dtype))
        .expect("Test tensor creation failed");
    Parameter::new(name, value)
}

/// All-ones gradient matching `param`.
#[allow(dead_code)]
pub fn ones_grad(param: &Parameter) -> Tensor {
    gradstep_core::tensor::full(&param.shape(), param.dtype(), 1.0).expect("Test tensor creation failed")
}

#[allow(dead_code)]
pub fn values(param: &Parameter) -> Vec<f64> {
    param.tensor().expect("parameter is initialized").to_f64_vec()
}
