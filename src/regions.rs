//! The closed set of Italian administrative regions published by the feed.

/// Label of the national scope in the selection control.
pub const NATIONAL_LABEL: &str = "Italia";

/// A known region with the coordinates of its administrative seat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub name: &'static str,
    pub lat: f64,
    pub long: f64,
}

impl Region {
    const fn new(name: &'static str, lat: f64, long: f64) -> Self {
        Self { name, lat, long }
    }
}

/// All 21 regions and autonomous provinces, in display order.
pub const REGIONS: [Region; 21] = [
    Region::new("Abruzzo", 42.351_221_96, 13.398_438_23),
    Region::new("Basilicata", 40.639_470_52, 15.805_148_34),
    Region::new("P.A. Bolzano", 46.499_334_53, 11.356_624_22),
    Region::new("Calabria", 38.905_975_98, 16.594_401_94),
    Region::new("Campania", 40.839_565_55, 14.250_849_84),
    Region::new("Emilia-Romagna", 44.494_366_81, 11.341_720_8),
    Region::new("Friuli Venezia Giulia", 45.649_435_4, 13.768_136_49),
    Region::new("Lazio", 41.892_770_44, 12.483_667_22),
    Region::new("Liguria", 44.411_493_15, 8.932_699_2),
    Region::new("Lombardia", 45.466_794_09, 9.190_347_404),
    Region::new("Marche", 43.616_759_73, 13.518_875_3),
    Region::new("Molise", 41.557_747_54, 14.659_160_51),
    Region::new("Piemonte", 45.073_274_5, 7.680_687_483),
    Region::new("Puglia", 41.125_595_76, 16.867_366_89),
    Region::new("Sardegna", 39.215_311_92, 9.110_616_306),
    Region::new("Sicilia", 38.115_697_25, 13.362_356_7),
    Region::new("Toscana", 43.769_230_77, 11.255_888_85),
    Region::new("P.A. Trento", 46.068_935_11, 11.121_230_97),
    Region::new("Umbria", 43.106_758_41, 12.388_246_98),
    Region::new("Valle d'Aosta", 45.737_502_86, 7.320_149_366),
    Region::new("Veneto", 45.434_904_85, 12.338_452_13),
];

/// Number of known regions; one ranking row per region.
pub const REGION_COUNT: usize = REGIONS.len();

/// Looks up a known region by its exact display name.
pub fn find(name: &str) -> Option<&'static Region> {
    REGIONS.iter().find(|r| r.name == name)
}

pub fn is_known(name: &str) -> bool {
    find(name).is_some()
}

/// Entries for the single-selection control: the national scope first,
/// then every region.
pub fn selection_options() -> impl Iterator<Item = &'static str> {
    std::iter::once(NATIONAL_LABEL).chain(REGIONS.iter().map(|r| r.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_region_names_are_unique() {
        let names: HashSet<_> = REGIONS.iter().map(|r| r.name).collect();
        assert_eq!(names.len(), REGION_COUNT);
        assert_eq!(REGION_COUNT, 21);
    }

    #[test]
    fn test_selection_options_start_with_national() {
        let options: Vec<_> = selection_options().collect();
        assert_eq!(options.len(), 22);
        assert_eq!(options[0], "Italia");
        assert_eq!(options[3], "P.A. Bolzano");
        assert_eq!(options[21], "Veneto");
    }

    #[test]
    fn test_find() {
        assert!(is_known("Valle d'Aosta"));
        assert!(!is_known("Italia"));
        assert!(!is_known("lombardia"));
        let lazio = find("Lazio").unwrap();
        assert!((lazio.lat - 41.89).abs() < 0.01);
    }
}
