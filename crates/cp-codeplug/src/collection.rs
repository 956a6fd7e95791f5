//! Ordered collection of captured images

use tracing::{info, warn};

use crate::image::Image;
use crate::pattern::CodeplugPattern;

/// Append-only list of completed captures, one image per session
#[derive(Debug, Clone, Default)]
pub struct Collection {
    images: Vec<Image>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sealed image, returning its index
    pub fn add_image(&mut self, image: Image) -> usize {
        info!("Captured image '{}' ({} elements)", image.label(), image.len());
        self.images.push(image);
        self.images.len() - 1
    }

    pub fn image(&self, index: usize) -> Option<&Image> {
        self.images.get(index)
    }

    pub fn image_mut(&mut self, index: usize) -> Option<&mut Image> {
        self.images.get_mut(index)
    }

    pub fn last(&self) -> Option<&Image> {
        self.images.last()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Image> {
        self.images.iter()
    }

    /// Annotate every image, returning the number annotated successfully
    pub fn annotate_all(&mut self, pattern: &CodeplugPattern) -> usize {
        let mut ok = 0;
        for image in &mut self.images {
            match image.annotate(pattern) {
                Ok(()) => ok += 1,
                Err(e) => warn!("Cannot annotate image '{}': {}", image.label(), e),
            }
        }
        ok
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Image;
    type IntoIter = std::slice::Iter<'a, Image>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.iter()
    }
}
