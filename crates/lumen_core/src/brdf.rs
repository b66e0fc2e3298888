//! Reflection, refraction and the Phong lobe.

use lumen_math::Vec3;

use crate::material::PhongLobe;

/// Reflect a vector about a normal.
#[inline]
pub fn reflect(v: Vec3, n: Vec3) -> Vec3 {
    v - 2.0 * v.dot(n) * n
}

/// Refract unit direction `d` through a surface whose unit normal `n` faces
/// against `d`. `eta` is the incident over transmitted index ratio.
///
/// Returns `None` on total internal reflection.
#[inline]
pub fn refract(d: Vec3, n: Vec3, eta: f32) -> Option<Vec3> {
    let cos_i = (-d.dot(n)).clamp(-1.0, 1.0);
    let k = 1.0 - eta * eta * (1.0 - cos_i * cos_i);
    if k < 0.0 {
        None
    } else {
        Some(eta * d + (eta * cos_i - k.sqrt()) * n)
    }
}

/// Exact unpolarized dielectric Fresnel reflectance `kr`.
///
/// `cos_i` is the cosine between the incident ray and the facing normal,
/// `eta` the incident over transmitted index ratio. Returns 1 under total
/// internal reflection.
pub fn fresnel(cos_i: f32, eta: f32) -> f32 {
    let cos_i = cos_i.clamp(0.0, 1.0);
    let sin_t2 = eta * eta * (1.0 - cos_i * cos_i);
    if sin_t2 >= 1.0 {
        return 1.0;
    }
    let cos_t = (1.0 - sin_t2).sqrt();
    let rs = (eta * cos_i - cos_t) / (eta * cos_i + cos_t);
    let rp = (cos_i - eta * cos_t) / (cos_i + eta * cos_t);
    (rs * rs + rp * rp) * 0.5
}

/// Ambient term of the Phong model.
#[inline]
pub fn phong_ambient(lobe: &PhongLobe, base: Vec3) -> Vec3 {
    base * lobe.ambient
}

/// Contribution of one light sample.
///
/// `to_light` is unit length; `mirrored_view` is the view direction
/// reflected about `normal`.
pub fn phong_direct(
    lobe: &PhongLobe,
    base: Vec3,
    normal: Vec3,
    mirrored_view: Vec3,
    to_light: Vec3,
    radiance: Vec3,
) -> Vec3 {
    let diffuse = normal.dot(to_light).max(0.0);
    let specular = if lobe.specular > 0.0 {
        mirrored_view.dot(to_light).max(0.0).powf(lobe.shininess)
    } else {
        0.0
    };
    radiance * (base * (lobe.diffuse * diffuse) + Vec3::splat(lobe.specular * specular))
}
