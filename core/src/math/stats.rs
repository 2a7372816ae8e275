pub struct StatsHelper;

impl StatsHelper {
    /// Euclidean norm of a three-axis vector.
    pub fn magnitude(axes: [f64; 3]) -> f64 {
        axes.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn peak(values: impl IntoIterator<Item = f64>) -> f64 {
        values.into_iter().fold(0.0, f64::max)
    }
}
