//! Color grading math shared between the CPU-side preview path and the
//! GLSL uniform values handed to the fragment shader (spec.md §4.5).

use crate::layer::display_properties::ColorGrade;

/// Applies brightness/contrast/saturation/hue/gamma to a single RGB pixel
/// in the `[0, 1]` range. Order matches the fragment shader: brightness,
/// then contrast, then saturation, then hue, then gamma.
pub fn apply_grade(grade: &ColorGrade, rgb: [f32; 3]) -> [f32; 3] {
    let mut c = rgb;

    for ch in c.iter_mut() {
        *ch += grade.brightness;
    }

    for ch in c.iter_mut() {
        *ch = (*ch - 0.5) * grade.contrast + 0.5;
    }

    let luma = 0.2126 * c[0] + 0.7152 * c[1] + 0.0722 * c[2];
    for ch in c.iter_mut() {
        *ch = luma + (*ch - luma) * grade.saturation;
    }

    if grade.hue_shift_degrees != 0.0 {
        c = rotate_hue(c, grade.hue_shift_degrees);
    }

    if grade.gamma > 0.0 {
        let inv_gamma = 1.0 / grade.gamma;
        for ch in c.iter_mut() {
            *ch = ch.max(0.0).powf(inv_gamma);
        }
    }

    [c[0].clamp(0.0, 1.0), c[1].clamp(0.0, 1.0), c[2].clamp(0.0, 1.0)]
}

fn rotate_hue(rgb: [f32; 3], degrees: f32) -> [f32; 3] {
    let angle = degrees.to_radians();
    let (sin, cos) = angle.sin_cos();

    // YIQ-space hue rotation, cheap enough to be done per-pixel on the CPU
    // preview path and trivially portable to GLSL.
    let y = 0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2];
    let i = 0.596 * rgb[0] - 0.274 * rgb[1] - 0.322 * rgb[2];
    let q = 0.211 * rgb[0] - 0.523 * rgb[1] + 0.312 * rgb[2];

    let i2 = i * cos - q * sin;
    let q2 = i * sin + q * cos;

    [
        y + 0.956 * i2 + 0.621 * q2,
        y - 0.272 * i2 - 0.647 * q2,
        y - 1.106 * i2 + 1.703 * q2,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_grade_is_a_no_op() {
        let grade = ColorGrade::default();
        let rgb = [0.2, 0.5, 0.8];
        let out = apply_grade(&grade, rgb);
        for (a, b) in rgb.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn zero_saturation_desaturates_to_luma() {
        let grade = ColorGrade {
            saturation: 0.0,
            ..ColorGrade::default()
        };
        let out = apply_grade(&grade, [1.0, 0.0, 0.0]);
        assert!((out[0] - out[1]).abs() < 1e-4);
        assert!((out[1] - out[2]).abs() < 1e-4);
    }

    #[test]
    fn brightness_shifts_and_clamps() {
        let grade = ColorGrade {
            brightness: 2.0,
            ..ColorGrade::default()
        };
        let out = apply_grade(&grade, [0.1, 0.1, 0.1]);
        assert_eq!(out, [1.0, 1.0, 1.0]);
    }
}
