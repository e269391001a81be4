//! Turbo color ramp.
//!
//! Perceptually ordered cool-to-hot mapping for traffic intensity, using
//! the published polynomial approximation of the Turbo colormap.

/// Map a normalized intensity in `[0, 1]` to an RGB color.
///
/// Low intensities render cool blues, high intensities hot reds.
pub fn turbo(t: f32) -> [u8; 3] {
    let t = t.clamp(0.0, 1.0);

    let r = 0.13572138
        + t * (4.61539260 + t * (-42.66032258 + t * (132.13108234 + t * (-152.94239396 + t * 59.28637943))));
    let g = 0.09140261
        + t * (2.19418839 + t * (4.84296658 + t * (-14.18503333 + t * (4.27729857 + t * 2.82956604))));
    let b = 0.10667330
        + t * (12.64194608 + t * (-60.58204836 + t * (110.36276771 + t * (-89.90310912 + t * 27.34824973))));

    [to_channel(r), to_channel(g), to_channel(b)]
}

fn to_channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
