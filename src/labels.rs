//! The closed detection vocabulary and per-label display colors.

use md5::{Digest, Md5};

/// Every label the detector can emit, in model class order.
pub const LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic_light", "fire_hydrant", "stop_sign", "parking_meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports_ball",
    "kite", "baseball_bat", "baseball_glove", "skateboard", "surfboard", "tennis_racket",
    "bottle", "wine_glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot_dog", "pizza", "donut", "cake", "chair",
    "couch", "potted_plant", "bed", "dining_table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell_phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy_bear", "hair_drier", "toothbrush",
];

pub fn is_known_label(label: &str) -> bool {
    LABELS.contains(&label)
}

/// Stable RGB color for a label.
///
/// The hue is the MD5 digest of the label (as a big-endian integer) modulo
/// 360; saturation and value are fixed so every label stays readable on
/// photographs.
pub fn label_color(label: &str) -> [u8; 3] {
    let digest = Md5::digest(label.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    let hue = (u128::from_be_bytes(bytes) % 360) as f64;
    hsv_to_rgb(hue / 360.0, 0.75, 1.0)
}

/// `#rrggbb` form of [`label_color`].
pub fn label_color_hex(label: &str) -> String {
    let [r, g, b] = label_color(label);
    format!("#{r:02x}{g:02x}{b:02x}")
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> [u8; 3] {
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match (sector as i64).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_is_unique() {
        let mut sorted = LABELS.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), LABELS.len());
        assert!(is_known_label("cat"));
        assert!(!is_known_label("Cat"));
    }

    #[test]
    fn test_hsv_primary_sectors() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), [255, 0, 0]);
        assert_eq!(hsv_to_rgb(0.5, 1.0, 1.0), [0, 255, 255]);
        assert_eq!(hsv_to_rgb(0.0, 0.0, 1.0), [255, 255, 255]);
    }

    #[test]
    fn test_label_color_is_stable() {
        assert_eq!(label_color("dog"), label_color("dog"));
        // Saturation 0.75 at full value keeps the brightest channel at 255.
        let [r, g, b] = label_color("person");
        assert_eq!(r.max(g).max(b), 255);
        assert!(label_color_hex("cat").starts_with('#'));
        assert_eq!(label_color_hex("cat").len(), 7);
    }
}
