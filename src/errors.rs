use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChiselError {
    #[error("filter format {0} not supported")]
    UnsupportedFilterFormat(String),
    #[error("only concat/slice at the channel dimension is supported, got axis {0}")]
    UnsupportedAxis(i64),
    #[error("output tensor {0} does not exist in the model")]
    MissingOutput(String),
    #[error("malformed graph: {0}")]
    MalformedGraph(String),
    #[error("tensor {name}: {len} payload elements do not fit dims {dims:?}")]
    ShapeMismatch {
        name: String,
        len: usize,
        dims: Vec<usize>,
    },
}

pub type ChiselResult<T> = Result<T, ChiselError>;
