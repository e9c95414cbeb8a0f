use nalgebra as na;
use num_traits::Float;

/// Constant velocity model over image coordinates.
///
/// State is `[x, y, vx, vy]`, one step per frame. Only the position is
/// observed.
#[derive(Debug, Clone)]
pub struct KalmanFilter<F>
where
    F: na::RealField + Float,
{
    state: na::Vector4<F>,
    covariance: na::Matrix4<F>,
    transition: na::Matrix4<F>,
    observation: na::Matrix2x4<F>,
    process_noise: na::Matrix4<F>,
    measurement_noise: na::Matrix2<F>,
}

impl<F> KalmanFilter<F>
where
    F: na::RealField + Float,
{
    pub const INITIAL_VARIANCE: f64 = 1000.0;

    pub fn new(position: na::Point2<F>) -> Self {
        Self::with_noise(position, na::convert(1.0), na::convert(10.0))
    }

    pub fn with_noise(position: na::Point2<F>, process: F, measurement: F) -> Self {
        let (zero, one) = (F::zero(), F::one());

        #[rustfmt::skip]
        let transition = na::Matrix4::new(
            one,  zero, one,  zero,
            zero, one,  zero, one,
            zero, zero, one,  zero,
            zero, zero, zero, one,
        );

        #[rustfmt::skip]
        let observation = na::Matrix2x4::new(
            one,  zero, zero, zero,
            zero, one,  zero, zero,
        );

        Self {
            state: na::Vector4::new(position.x, position.y, zero, zero),
            covariance: na::Matrix4::identity() * na::convert::<f64, F>(Self::INITIAL_VARIANCE),
            transition,
            observation,
            process_noise: na::Matrix4::identity() * process,
            measurement_noise: na::Matrix2::identity() * measurement,
        }
    }

    #[inline]
    pub fn position(&self) -> na::Point2<F> {
        na::Point2::new(self.state[0], self.state[1])
    }

    #[inline]
    pub fn velocity(&self) -> na::Vector2<F> {
        na::Vector2::new(self.state[2], self.state[3])
    }

    #[inline]
    pub fn covariance(&self) -> &na::Matrix4<F> {
        &self.covariance
    }

    pub fn predict(&mut self) -> na::Point2<F> {
        self.state = self.transition * self.state;
        self.covariance =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;

        self.position()
    }

    pub fn correct(&mut self, measured: na::Point2<F>) -> na::Point2<F> {
        let z = na::Vector2::new(measured.x, measured.y);
        let innovation = z - self.observation * self.state;
        let s = self.observation * self.covariance * self.observation.transpose()
            + self.measurement_noise;

        let s_inv = match s.try_inverse() {
            Some(m) => m,
            None => return self.position(),
        };

        let gain = self.covariance * self.observation.transpose() * s_inv;

        self.state += gain * innovation;
        self.covariance = (na::Matrix4::identity() - gain * self.observation) * self.covariance;

        self.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_correction_trusts_the_measurement() {
        let mut kf = KalmanFilter::<f32>::new(na::Point2::new(100.0, 200.0));
        kf.predict();
        let p = kf.correct(na::Point2::new(110.0, 200.0));

        // huge prior variance, the gain is close to one
        assert!((p.x - 110.0).abs() < 0.2);
        assert!((p.y - 200.0).abs() < 0.2);
    }

    #[test]
    fn learns_constant_velocity() {
        let mut kf = KalmanFilter::<f64>::new(na::Point2::new(0.0, 0.0));

        for i in 1..30 {
            kf.predict();
            kf.correct(na::Point2::new(5.0 * i as f64, 2.0 * i as f64));
        }

        let v = kf.velocity();
        assert!((v.x - 5.0).abs() < 0.5);
        assert!((v.y - 2.0).abs() < 0.5);

        let ahead = kf.predict();
        assert!((ahead.x - 150.0).abs() < 2.0);
    }

    #[test]
    fn prediction_grows_uncertainty() {
        let mut kf = KalmanFilter::<f32>::new(na::Point2::new(0.0, 0.0));
        let before = kf.covariance()[(0, 0)];
        kf.predict();

        assert!(kf.covariance()[(0, 0)] > before);
    }
}
