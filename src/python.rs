//! Python bindings (feature `python`)

use crate::core::{indices, partition};
use crate::core::partition::PeriodScheme;
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;

fn to_py_err(err: crate::CompositeError) -> PyErr {
    match err {
        crate::CompositeError::Configuration(_) => PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", err)),
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", err)),
    }
}

fn parse_scheme(scheme: &str, days: Option<u32>, acquisition_days: Option<u32>) -> PyResult<PeriodScheme> {
    match scheme.to_uppercase().as_str() {
        "CALENDAR_MONTH" | "MONTHLY" => Ok(PeriodScheme::CalendarMonth),
        "BIWEEKLY" => Ok(PeriodScheme::Biweekly),
        "FIXED_DAYS" => Ok(PeriodScheme::FixedDays { days: days.unwrap_or(15) }),
        "SLIDING_WINDOW" => {
            let output_days = days.unwrap_or(15);
            Ok(PeriodScheme::SlidingWindow {
                output_days,
                acquisition_days: acquisition_days.unwrap_or(output_days),
            })
        }
        _ => Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
            "Invalid period scheme: {}",
            scheme
        ))),
    }
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyPeriod>()?;
    m.add_function(wrap_pyfunction!(plan_periods, m)?)?;
    m.add_function(wrap_pyfunction!(period_chunks, m)?)?;
    m.add_function(wrap_pyfunction!(normalized_difference, m)?)?;
    m.add_function(wrap_pyfunction!(threshold_mask, m)?)?;
    Ok(())
}

/// Python wrapper for PeriodDescriptor
#[pyclass(name = "Period")]
#[derive(Clone)]
struct PyPeriod {
    inner: crate::PeriodDescriptor,
}

#[pymethods]
impl PyPeriod {
    #[getter]
    fn number(&self) -> usize {
        self.inner.number()
    }

    #[getter]
    fn label(&self) -> String {
        self.inner.label.clone()
    }

    #[getter]
    fn output_start(&self) -> String {
        self.inner.output_start.to_string()
    }

    /// Last included day
    #[getter]
    fn output_end(&self) -> String {
        self.inner.last_output_day().to_string()
    }

    #[getter]
    fn acquisition_start(&self) -> String {
        self.inner.acquisition_start.to_string()
    }

    #[getter]
    fn acquisition_end(&self) -> String {
        self.inner.last_acquisition_day().to_string()
    }

    fn __repr__(&self) -> String {
        format!(
            "Period({}, '{}', {} .. {})",
            self.inner.number(),
            self.inner.label,
            self.inner.output_start,
            self.inner.last_output_day()
        )
    }
}

#[pyfunction]
#[pyo3(signature = (scheme, year, days=None, acquisition_days=None, period_limit=None))]
fn plan_periods(
    scheme: &str,
    year: i32,
    days: Option<u32>,
    acquisition_days: Option<u32>,
    period_limit: Option<usize>,
) -> PyResult<Vec<PyPeriod>> {
    let scheme = parse_scheme(scheme, days, acquisition_days)?;
    let periods = partition::partition_periods(scheme, year, period_limit).map_err(to_py_err)?;
    Ok(periods.into_iter().map(|inner| PyPeriod { inner }).collect())
}

/// `(first, last, label)` tuples, 0-based inclusive indices
#[pyfunction]
fn period_chunks(total_periods: usize, chunk_size: usize) -> PyResult<Vec<(usize, usize, String)>> {
    let chunks = partition::periods_to_chunks(total_periods, chunk_size).map_err(to_py_err)?;
    Ok(chunks.into_iter().map(|c| (c.first, c.last, c.label)).collect())
}

#[pyfunction]
fn normalized_difference<'py>(
    py: Python<'py>,
    positive: PyReadonlyArray2<'py, f32>,
    negative: PyReadonlyArray2<'py, f32>,
) -> PyResult<&'py PyArray2<f32>> {
    let positive = positive.as_array().to_owned();
    let negative = negative.as_array().to_owned();
    if positive.dim() != negative.dim() {
        return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
            "Shape mismatch: {:?} vs {:?}",
            positive.dim(),
            negative.dim()
        )));
    }
    Ok(indices::normalized_difference(&positive, &negative).into_pyarray(py))
}

#[pyfunction]
fn threshold_mask<'py>(py: Python<'py>, index: PyReadonlyArray2<'py, f32>, threshold: f64) -> PyResult<&'py PyArray2<f32>> {
    let index = index.as_array().to_owned();
    Ok(indices::threshold_mask(&index, threshold).into_pyarray(py))
}
