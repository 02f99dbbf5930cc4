//! Deterministic rasteriser for the simulated document.
//!
//! Every visible element paints its unclipped box with a fill colour derived
//! from a SHA-256 digest of its rendered state, then a one pixel border. Any
//! state change that would show on screen (classes, attributes, value, text,
//! visibility, scroll position) therefore changes the pixels.

use image::{DynamicImage, Rgba, RgbaImage};
use sha2::{Digest, Sha256};

use super::dom::{Document, Node};
use crate::driver::Screenshot;
use crate::locator::BoundingBox;
use crate::result::{MirarError, MirarResult};

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

fn fill_color(node: &Node) -> Rgba<u8> {
    let mut hasher = Sha256::new();
    hasher.update(node.tag.as_bytes());
    for (name, value) in node.all_attributes() {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    if let Some(value) = &node.value {
        hasher.update(b"value:");
        hasher.update(value.as_bytes());
    }
    hasher.update(b"text:");
    hasher.update(node.text.as_bytes());
    let digest = hasher.finalize();
    // Keep fills light so borders stay distinguishable
    Rgba([
        128 | digest[0],
        128 | digest[1],
        128 | digest[2],
        255,
    ])
}

fn border_color(fill: Rgba<u8>) -> Rgba<u8> {
    Rgba([fill[0] / 3, fill[1] / 3, fill[2] / 3, 255])
}

/// Paint `clip` (page coordinates) of `doc`
pub(crate) fn render(doc: &Document, clip: BoundingBox) -> MirarResult<Screenshot> {
    let width = clip.width.round() as u32;
    let height = clip.height.round() as u32;
    if width == 0 || height == 0 {
        return Err(MirarError::Screenshot {
            message: format!("empty capture area {}x{}", clip.width, clip.height),
        });
    }

    let mut img = RgbaImage::from_pixel(width, height, BACKGROUND);
    for index in 0..doc.len() {
        if !doc.is_visible(index) {
            continue;
        }
        let Some(node) = doc.node(index) else {
            continue;
        };
        let Some(visible) = doc.clipped_box(index) else {
            continue;
        };
        let Some(area) = visible.intersection(&clip) else {
            continue;
        };
        let fill = fill_color(node);
        let border = border_color(fill);
        paint(&mut img, &clip, &area, &visible, fill, border);
    }

    Screenshot::from_image(&DynamicImage::ImageRgba8(img))
}

fn paint(
    img: &mut RgbaImage,
    clip: &BoundingBox,
    area: &BoundingBox,
    element: &BoundingBox,
    fill: Rgba<u8>,
    border: Rgba<u8>,
) {
    let x0 = (area.x - clip.x).floor().max(0.0) as u32;
    let y0 = (area.y - clip.y).floor().max(0.0) as u32;
    let x1 = ((area.right() - clip.x).ceil() as u32).min(img.width());
    let y1 = ((area.bottom() - clip.y).ceil() as u32).min(img.height());

    let left = element.x.floor();
    let top = element.y.floor();
    let right = (element.right() - 1.0).floor();
    let bottom = (element.bottom() - 1.0).floor();

    for py in y0..y1 {
        let page_y = clip.y + f64::from(py);
        for px in x0..x1 {
            let page_x = clip.x + f64::from(px);
            let on_edge = page_x.floor() == left
                || page_x.floor() == right
                || page_y.floor() == top
                || page_y.floor() == bottom;
            img.put_pixel(px, py, if on_edge { border } else { fill });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::driver::Size;
    use crate::sim::dom::ElementSpec;
    use image::GenericImageView;

    fn doc(class: &str) -> Document {
        let body = ElementSpec::new("body")
            .at(0.0, 0.0, 40.0, 40.0)
            .child(ElementSpec::new("div").class(class).at(10.0, 10.0, 20.0, 20.0));
        Document::new(body, Size::new(40.0, 40.0))
    }

    #[test]
    fn test_render_dimensions() {
        let shot = render(&doc("a"), BoundingBox::new(0.0, 0.0, 40.0, 30.0)).unwrap();
        assert_eq!((shot.width, shot.height), (40, 30));
        assert_eq!(shot.decode().unwrap().dimensions(), (40, 30));
    }

    #[test]
    fn test_render_is_deterministic() {
        let clip = BoundingBox::new(0.0, 0.0, 40.0, 40.0);
        let a = render(&doc("a"), clip).unwrap();
        let b = render(&doc("a"), clip).unwrap();
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_state_change_changes_pixels() {
        let clip = BoundingBox::new(0.0, 0.0, 40.0, 40.0);
        let a = render(&doc("a"), clip).unwrap().decode().unwrap();
        let b = render(&doc("b"), clip).unwrap().decode().unwrap();
        assert_ne!(a.get_pixel(20, 20), b.get_pixel(20, 20));
        assert_eq!(a.get_pixel(2, 2), b.get_pixel(2, 2));
    }

    #[test]
    fn test_clip_offset() {
        let d = doc("a");
        let full = render(&d, BoundingBox::new(0.0, 0.0, 40.0, 40.0))
            .unwrap()
            .decode()
            .unwrap();
        let part = render(&d, BoundingBox::new(10.0, 10.0, 20.0, 20.0))
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(part.get_pixel(0, 0), full.get_pixel(10, 10));
        assert_eq!(part.get_pixel(5, 5), full.get_pixel(15, 15));
    }

    #[test]
    fn test_empty_clip_rejected() {
        assert!(render(&doc("a"), BoundingBox::new(0.0, 0.0, 0.0, 10.0)).is_err());
    }
}
