//! Pixel-to-world exports of a solved stack: ESRI world file, `.prj`
//! sidecar and the GeoTIFF `ModelTransformationTag`.

use std::path::Path;

use georeg_core::{Affine, TransformStack};
use georeg_geodesy::{write_prj, write_world_file, Georef, NAD83_2011_WKT};

use crate::error::SessionError;

/// Source pixel to world affine. Without a georeference the world is the
/// reference pixel grid.
pub fn source_to_world(
    stack: &TransformStack,
    georef: Option<&Georef>,
) -> Result<Affine, SessionError> {
    let Some(affine) = stack.as_affine() else {
        let (stage, kind) = stack
            .stages
            .iter()
            .enumerate()
            .find(|(_, t)| t.as_affine().is_none())
            .map(|(i, t)| (i, t.label()))
            .unwrap_or((0, "unknown"));
        return Err(SessionError::NotAffine { stage, kind });
    };
    Ok(match georef {
        Some(g) => affine.then(&g.to_affine()),
        None => affine,
    })
}

/// World-file lines `[A, D, B, E, C, F]` for the composed map.
pub fn world_file_lines(
    stack: &TransformStack,
    georef: Option<&Georef>,
) -> Result<[f64; 6], SessionError> {
    let affine = source_to_world(stack, georef)?;
    Ok(Georef::from_affine(&affine, None).affine)
}

pub fn export_world_file(
    path: impl AsRef<Path>,
    stack: &TransformStack,
    georef: Option<&Georef>,
) -> Result<(), SessionError> {
    let lines = world_file_lines(stack, georef)?;
    write_world_file(path.as_ref(), &lines)?;
    log::info!("export: wrote world file {}", path.as_ref().display());
    Ok(())
}

/// Write the reference CRS as a `.prj`; NAD83(2011) geographic when the
/// reference carries none.
pub fn export_prj(path: impl AsRef<Path>, georef: Option<&Georef>) -> Result<(), SessionError> {
    let wkt = georef
        .and_then(|g| g.wkt.as_deref())
        .unwrap_or(NAD83_2011_WKT);
    write_prj(path.as_ref(), wkt)?;
    Ok(())
}

/// Row-major 4x4 GeoTIFF `ModelTransformationTag` for the composed map.
pub fn model_transformation_tag(
    stack: &TransformStack,
    georef: Option<&Georef>,
) -> Result<[f64; 16], SessionError> {
    let t = source_to_world(stack, georef)?;
    Ok([
        t.a, t.b, 0.0, t.tx, //
        t.c, t.d, 0.0, t.ty, //
        0.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use georeg_core::{FreeFormDeformation, Similarity, Transform};
    use georeg_geodesy::read_world_file;
    use nalgebra::Point2;

    fn shift(tx: f64, ty: f64) -> TransformStack {
        TransformStack::single(Similarity {
            scale: 1.0,
            rotation: 0.0,
            tx,
            ty,
        })
    }

    #[test]
    fn world_file_composes_with_georef() {
        let georef = Georef::new([2.0, 0.0, 0.0, -2.0, 1000.0, 5000.0], None);
        let stack = shift(5.0, 5.0);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("source.wld");
        export_world_file(&path, &stack, Some(&georef)).expect("export");
        let lines = read_world_file(&path).expect("read");
        let written = Georef::new(lines, None);
        let world = written.pixel_to_world(1.0, 2.0);
        let expect = georef.pixel_to_world(6.0, 7.0);
        assert!((world - expect).norm() < 1e-9);
    }

    #[test]
    fn world_file_without_georef_is_reference_pixels() {
        let lines = world_file_lines(&shift(3.0, -4.0), None).expect("lines");
        assert_eq!(lines, [1.0, 0.0, 0.0, 1.0, 3.0, -4.0]);
    }

    #[test]
    fn nonlinear_stack_is_rejected() {
        let ffd = FreeFormDeformation::zeros(Point2::new(0.0, 0.0), 10.0, 3, 3);
        let mut stack = shift(1.0, 1.0);
        stack.push(Transform::FreeFormDeformation(ffd));
        assert!(matches!(
            world_file_lines(&stack, None),
            Err(SessionError::NotAffine { stage: 1, .. })
        ));
    }

    #[test]
    fn tag_layout() {
        let tag = model_transformation_tag(&shift(3.0, -4.0), None).expect("tag");
        assert_eq!(&tag[..4], &[1.0, 0.0, 0.0, 3.0]);
        assert_eq!(&tag[4..8], &[0.0, 1.0, 0.0, -4.0]);
        assert_eq!(tag[15], 1.0);
    }

    #[test]
    fn prj_falls_back_to_nad83() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("source.prj");
        export_prj(&path, None).expect("prj");
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("NAD83(2011)"));
    }
}
