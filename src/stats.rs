use std::fmt;
use std::ops::{Add, AddAssign};

/// Counters kept by one cache.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub struct CacheStats {
    pub read_hits: u64,
    pub read_misses: u64,
    pub write_hits: u64,
    pub write_misses: u64,
    pub evictions: u64,
    pub write_backs: u64,
}

impl CacheStats {
    pub fn reads(&self) -> u64 {
        self.read_hits + self.read_misses
    }

    pub fn writes(&self) -> u64 {
        self.write_hits + self.write_misses
    }

    pub fn hits(&self) -> u64 {
        self.read_hits + self.write_hits
    }

    pub fn misses(&self) -> u64 {
        self.read_misses + self.write_misses
    }

    // percentages, NaN without any access of the kind
    pub fn read_hit_rate(&self) -> f64 {
        percent(self.read_hits, self.reads())
    }

    pub fn write_hit_rate(&self) -> f64 {
        percent(self.write_hits, self.writes())
    }

    pub fn hit_rate(&self) -> f64 {
        percent(self.hits(), self.reads() + self.writes())
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    part as f64 / whole as f64 * 100.0
}

impl Add<CacheStats> for CacheStats {
    type Output = CacheStats;

    fn add(self, rhs: CacheStats) -> Self::Output {
        Self::Output {
            read_hits: self.read_hits + rhs.read_hits,
            read_misses: self.read_misses + rhs.read_misses,
            write_hits: self.write_hits + rhs.write_hits,
            write_misses: self.write_misses + rhs.write_misses,
            evictions: self.evictions + rhs.evictions,
            write_backs: self.write_backs + rhs.write_backs,
        }
    }
}

impl AddAssign for CacheStats {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.add(rhs)
    }
}

/// Outcome of a finished simulation: one row per processor.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub per_cpu: Vec<CacheStats>,
    pub cycles: u64,
}

impl Report {
    pub fn total(&self) -> CacheStats {
        self.per_cpu
            .iter()
            .fold(CacheStats::default(), |acc, s| acc + *s)
    }
}

const W: usize = 10;

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}",
            "CPU",
            "Reads",
            "RHit",
            "Rmiss",
            "Writes",
            "WHit",
            "WMiss",
            "RHitrate",
            "WHitrate",
            "Hitrate"
        )?;
        for (cpu, s) in self.per_cpu.iter().enumerate() {
            writeln!(
                f,
                "{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$}{:>W$.2}{:>W$.2}{:>W$.2}",
                cpu,
                s.reads(),
                s.read_hits,
                s.read_misses,
                s.writes(),
                s.write_hits,
                s.write_misses,
                s.read_hit_rate(),
                s.write_hit_rate(),
                s.hit_rate(),
            )?;
        }
        write!(f, "Total simulation time: {} cycles", self.cycles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stats_are_zero() {
        let s = CacheStats::default();
        assert_eq!(s.reads(), 0);
        assert_eq!(s.writes(), 0);
        assert!(s.hit_rate().is_nan());
    }

    #[test]
    fn rates() {
        let s = CacheStats {
            read_hits: 3,
            read_misses: 1,
            write_hits: 0,
            write_misses: 4,
            ..Default::default()
        };
        assert_eq!(s.read_hit_rate(), 75.0);
        assert_eq!(s.write_hit_rate(), 0.0);
        assert_eq!(s.hit_rate(), 37.5);
    }

    #[test]
    fn add() {
        let (mut a, mut b) = (CacheStats::default(), CacheStats::default());
        a.read_hits += 1;
        b.write_backs += 5;
        a += b;
        assert_eq!(a.read_hits, 1);
        assert_eq!(a.write_backs, 5);
    }

    #[test]
    fn report_table() {
        let report = Report {
            per_cpu: vec![
                CacheStats {
                    read_hits: 1,
                    read_misses: 1,
                    ..Default::default()
                },
                CacheStats::default(),
            ],
            cycles: 208,
        };
        let text = report.to_string();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].trim_start().starts_with("CPU"));
        assert!(lines[0].ends_with("Hitrate"));
        assert!(lines[1].ends_with("50.00       NaN     50.00"));
        assert!(lines[2].contains("NaN"));
        assert_eq!(lines[3], "Total simulation time: 208 cycles");
        assert_eq!(report.total().reads(), 2);
    }
}
