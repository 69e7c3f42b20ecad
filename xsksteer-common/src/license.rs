use core::fmt;

/// License strings the kernel recognises as GPL-compatible.
///
/// The program uses GPL-only helpers (`bpf_redirect_map`, the log ring
/// buffer), so only GPL-compatible declarations are offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum License {
    #[default]
    Gpl,
    GplV2,
    DualBsdGpl,
    DualMitGpl,
    DualMplGpl,
}

/// The `license-*` cargo features enabled on the eBPF crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LicenseFeatures {
    pub gpl_v2: bool,
    pub dual_bsd_gpl: bool,
    pub dual_mit_gpl: bool,
    pub dual_mpl_gpl: bool,
}

impl License {
    pub const fn as_str(self) -> &'static str {
        match self {
            License::Gpl => "GPL",
            License::GplV2 => "GPL v2",
            License::DualBsdGpl => "Dual BSD/GPL",
            License::DualMitGpl => "Dual MIT/GPL",
            License::DualMplGpl => "Dual MPL/GPL",
        }
    }

    /// Contents of the object's `license` section, NUL terminated.
    pub const fn section(self) -> &'static [u8] {
        match self {
            License::Gpl => b"GPL\0",
            License::GplV2 => b"GPL v2\0",
            License::DualBsdGpl => b"Dual BSD/GPL\0",
            License::DualMitGpl => b"Dual MIT/GPL\0",
            License::DualMplGpl => b"Dual MPL/GPL\0",
        }
    }

    /// Picks the declared license. When several features are on, the first of
    /// Dual BSD/GPL, Dual MIT/GPL, Dual MPL/GPL, GPL v2 wins; none means GPL.
    pub const fn from_features(features: LicenseFeatures) -> License {
        if features.dual_bsd_gpl {
            License::DualBsdGpl
        } else if features.dual_mit_gpl {
            License::DualMitGpl
        } else if features.dual_mpl_gpl {
            License::DualMplGpl
        } else if features.gpl_v2 {
            License::GplV2
        } else {
            License::Gpl
        }
    }
}

impl fmt::Display for License {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_nul_terminated_names() {
        for license in [
            License::Gpl,
            License::GplV2,
            License::DualBsdGpl,
            License::DualMitGpl,
            License::DualMplGpl,
        ] {
            let section = license.section();
            assert_eq!(section.last(), Some(&0));
            assert_eq!(&section[..section.len() - 1], license.as_str().as_bytes());
        }
    }

    #[test]
    fn every_license_is_reachable_from_a_feature() {
        assert_eq!(License::from_features(LicenseFeatures::default()), License::Gpl);
        let only = |f: fn(&mut LicenseFeatures)| {
            let mut features = LicenseFeatures::default();
            f(&mut features);
            License::from_features(features)
        };
        assert_eq!(only(|f| f.gpl_v2 = true), License::GplV2);
        assert_eq!(only(|f| f.dual_bsd_gpl = true), License::DualBsdGpl);
        assert_eq!(only(|f| f.dual_mit_gpl = true), License::DualMitGpl);
        assert_eq!(only(|f| f.dual_mpl_gpl = true), License::DualMplGpl);
    }

    #[test]
    fn dual_licenses_take_precedence_over_gpl_v2() {
        let all = LicenseFeatures {
            gpl_v2: true,
            dual_bsd_gpl: true,
            dual_mit_gpl: true,
            dual_mpl_gpl: true,
        };
        assert_eq!(License::from_features(all), License::DualBsdGpl);

        let v2_and_mpl = LicenseFeatures {
            gpl_v2: true,
            dual_mpl_gpl: true,
            ..LicenseFeatures::default()
        };
        assert_eq!(License::from_features(v2_and_mpl), License::DualMplGpl);
    }
}
