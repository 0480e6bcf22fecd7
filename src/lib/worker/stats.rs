use crate::worker::types::{
    CpuStat, DiskInfo, LoadAvg, MemInfo, ProcfsProvider, Stats, StatsError, StatsProvider,
};
use procfs::{FromRead, FromReadSI, KernelStats, LoadAverage, Meminfo, ProcError};
use serde::{Serialize, ser::SerializeStruct};
use std::path::PathBuf;
use sysinfo::Disks;

impl Serialize for Stats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let errors: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();

        let mut state = serializer.serialize_struct("Stats", 14)?;
        state.serialize_field("mem_total_kb", &self.mem_total_kb())?;
        state.serialize_field("mem_available_kb", &self.mem_available_kb())?;
        state.serialize_field("mem_used_kb", &self.mem_used_kb())?;
        state.serialize_field("mem_used_percent", &self.mem_used_percent())?;
        state.serialize_field("disk_total", &self.disk_total())?;
        state.serialize_field("disk_free", &self.disk_free())?;
        state.serialize_field("disk_used", &self.disk_used())?;
        state.serialize_field("cpu_usage", &self.cpu_usage())?;
        state.serialize_field("load_1", &self.load_stats.last1)?;
        state.serialize_field("load_5", &self.load_stats.last5)?;
        state.serialize_field("load_15", &self.load_stats.last15)?;
        state.serialize_field("processes_running", &self.load_stats.process_running)?;
        state.serialize_field("task_count", &self.task_count)?;
        state.serialize_field("errors", &errors)?;
        state.end()
    }
}

impl Stats {
    /// Queries every provider once. A failing provider leaves its section at
    /// its default and adds an entry to `errors`.
    pub fn collect(provider: &dyn StatsProvider, task_count: usize) -> Stats {
        let mut stats = Stats {
            task_count,
            ..Default::default()
        };

        match provider.memory() {
            Ok(mem) => stats.mem_stats = mem,
            Err(e) => stats.errors.push(e),
        }
        match provider.disk() {
            Ok(disk) => stats.disk_stats = disk,
            Err(e) => stats.errors.push(e),
        }
        match provider.cpu() {
            Ok(cpu) => stats.cpu_stats = cpu,
            Err(e) => stats.errors.push(e),
        }
        match provider.load() {
            Ok(load) => stats.load_stats = load,
            Err(e) => stats.errors.push(e),
        }

        stats
    }

    pub fn mem_total_kb(&self) -> u64 {
        self.mem_stats.mem_total
    }

    pub fn mem_available_kb(&self) -> u64 {
        self.mem_stats.mem_available
    }

    pub fn mem_used_kb(&self) -> u64 {
        self.mem_total_kb().saturating_sub(self.mem_available_kb())
    }

    /// Returns the *available* share of memory, not the used share.
    pub fn mem_used_percent(&self) -> f64 {
        if self.mem_total_kb() == 0 {
            return 0.0;
        }
        self.mem_available_kb() as f64 / self.mem_total_kb() as f64
    }

    pub fn disk_total(&self) -> u64 {
        self.disk_stats.all
    }

    pub fn disk_free(&self) -> u64 {
        self.disk_stats.free
    }

    pub fn disk_used(&self) -> u64 {
        self.disk_stats.used
    }

    pub fn cpu_usage(&self) -> f64 {
        let cpu = &self.cpu_stats;
        let idle = cpu.idle + cpu.iowait;
        let non_idle = cpu.user + cpu.nice + cpu.system + cpu.irq + cpu.softirq + cpu.steal;
        let total = idle + non_idle;

        if total == 0 {
            return 0.0;
        }

        (total as f64 - idle as f64) / total as f64
    }
}

impl ProcfsProvider {
    pub fn new(proc_root: impl Into<PathBuf>, disk_path: impl Into<PathBuf>) -> Self {
        ProcfsProvider {
            proc_root: proc_root.into(),
            disk_path: disk_path.into(),
        }
    }

    fn proc_file(&self, file: &str) -> PathBuf {
        self.proc_root.join(file)
    }
}

/// Missing or unreadable files are read errors, anything else procfs rejects
/// is a parse error.
fn stats_error(path: PathBuf, err: ProcError) -> StatsError {
    let reason = err.to_string();
    match err {
        ProcError::NotFound(..) | ProcError::PermissionDenied(..) | ProcError::Io(..) => {
            StatsError::Read { path, reason }
        }
        _ => StatsError::Parse { path, reason },
    }
}

impl StatsProvider for ProcfsProvider {
    fn memory(&self) -> Result<MemInfo, StatsError> {
        let path = self.proc_file("meminfo");
        let meminfo = Meminfo::from_file(&path).map_err(|e| stats_error(path, e))?;

        // procfs reports bytes.
        let kb = |bytes: u64| bytes / 1024;
        Ok(MemInfo {
            mem_total: kb(meminfo.mem_total),
            mem_free: kb(meminfo.mem_free),
            mem_available: kb(meminfo.mem_available.unwrap_or_default()),
            buffers: kb(meminfo.buffers),
            cached: kb(meminfo.cached),
            swap_total: kb(meminfo.swap_total),
            swap_free: kb(meminfo.swap_free),
        })
    }

    fn disk(&self) -> Result<DiskInfo, StatsError> {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|disk| self.disk_path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().components().count())
            .ok_or_else(|| StatsError::DiskNotFound(self.disk_path.clone()))?;

        let all = disk.total_space();
        let free = disk.available_space();
        Ok(DiskInfo {
            all,
            free,
            used: all.saturating_sub(free),
        })
    }

    /// Aggregate `cpu` line, in clock ticks. Counters an older kernel does
    /// not report read as zero.
    fn cpu(&self) -> Result<CpuStat, StatsError> {
        let path = self.proc_file("stat");
        let kernel = KernelStats::from_file(&path, procfs::current_system_info())
            .map_err(|e| stats_error(path, e))?;

        let total = kernel.total;
        Ok(CpuStat {
            user: total.user,
            nice: total.nice,
            system: total.system,
            idle: total.idle,
            iowait: total.iowait.unwrap_or_default(),
            irq: total.irq.unwrap_or_default(),
            softirq: total.softirq.unwrap_or_default(),
            steal: total.steal.unwrap_or_default(),
            guest: total.guest.unwrap_or_default(),
            guest_nice: total.guest_nice.unwrap_or_default(),
        })
    }

    fn load(&self) -> Result<LoadAvg, StatsError> {
        let path = self.proc_file("loadavg");
        let load = LoadAverage::from_file(&path).map_err(|e| stats_error(path, e))?;

        Ok(LoadAvg {
            last1: f64::from(load.one),
            last5: f64::from(load.five),
            last15: f64::from(load.fifteen),
            process_running: u64::from(load.cur),
            process_total: u64::from(load.max),
            last_pid: u64::from(load.latest_pid),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        cpu: CpuStat,
        fail_memory: bool,
    }

    impl StatsProvider for FixedProvider {
        fn memory(&self) -> Result<MemInfo, StatsError> {
            if self.fail_memory {
                return Err(StatsError::Read {
                    path: PathBuf::from("/proc/meminfo"),
                    reason: "permission denied".to_string(),
                });
            }
            Ok(MemInfo {
                mem_total: 1000,
                mem_available: 250,
                ..Default::default()
            })
        }

        fn disk(&self) -> Result<DiskInfo, StatsError> {
            Ok(DiskInfo {
                all: 100,
                used: 40,
                free: 60,
            })
        }

        fn cpu(&self) -> Result<CpuStat, StatsError> {
            Ok(self.cpu.clone())
        }

        fn load(&self) -> Result<LoadAvg, StatsError> {
            Err(StatsError::Parse {
                path: PathBuf::from("/proc/loadavg"),
                reason: "expected 5 fields, got 0".to_string(),
            })
        }
    }

    #[test]
    fn cpu_usage_counts_iowait_as_idle() {
        let stats = Stats {
            cpu_stats: CpuStat {
                user: 20,
                system: 10,
                idle: 50,
                iowait: 10,
                ..Default::default()
            },
            ..Default::default()
        };

        assert!((stats.cpu_usage() - 30.0 / 90.0).abs() < 1e-9);
    }

    #[test]
    fn cpu_usage_is_zero_without_ticks() {
        assert_eq!(Stats::default().cpu_usage(), 0.0);
    }

    #[test]
    fn memory_figures() {
        let stats = Stats {
            mem_stats: MemInfo {
                mem_total: 1000,
                mem_available: 250,
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(stats.mem_used_kb(), 750);
        // available over total
        assert_eq!(stats.mem_used_percent(), 0.25);
        assert_eq!(Stats::default().mem_used_percent(), 0.0);
    }

    #[test]
    fn collect_keeps_going_after_provider_errors() {
        let provider = FixedProvider {
            cpu: CpuStat::default(),
            fail_memory: true,
        };

        let stats = Stats::collect(&provider, 3);

        assert_eq!(stats.task_count, 3);
        assert_eq!(stats.errors.len(), 2);
        assert_eq!(stats.mem_stats, MemInfo::default());
        assert_eq!(stats.disk_used(), 40);
        assert_eq!(stats.disk_free(), 60);
        assert_eq!(stats.disk_total(), 100);
    }

    #[test]
    fn serialized_stats_expose_errors_as_strings() {
        let provider = FixedProvider {
            cpu: CpuStat {
                user: 1,
                idle: 1,
                ..Default::default()
            },
            fail_memory: false,
        };

        let json = serde_json::to_value(Stats::collect(&provider, 0)).unwrap();

        assert_eq!(json["mem_used_kb"], 750);
        assert_eq!(json["cpu_usage"], 0.5);
        assert_eq!(
            json["errors"][0],
            "error parsing /proc/loadavg: expected 5 fields, got 0"
        );
    }

    const MEMINFO: &str = "\
MemTotal:        6147400 kB
MemFree:         3633044 kB
MemAvailable:    5638700 kB
Buffers:           70084 kB
Cached:          2122864 kB
SwapCached:            0 kB
Active:           863304 kB
Inactive:        1500440 kB
Active(anon):         12 kB
Inactive(anon):   180072 kB
Active(file):     863292 kB
Inactive(file):  1320368 kB
Unevictable:        9436 kB
Mlocked:            9436 kB
SwapTotal:       2097148 kB
SwapFree:        2097000 kB
Dirty:                80 kB
Writeback:             0 kB
AnonPages:        180304 kB
Mapped:           140468 kB
Shmem:              9288 kB
KReclaimable:      67616 kB
Slab:              88984 kB
SReclaimable:      67616 kB
SUnreclaim:        21368 kB
KernelStack:        1184 kB
PageTables:         2004 kB
NFS_Unstable:          0 kB
Bounce:                0 kB
WritebackTmp:          0 kB
CommitLimit:     3073700 kB
Committed_AS:     339276 kB
VmallocTotal:   34359738367 kB
VmallocUsed:       15912 kB
VmallocChunk:          0 kB
Percpu:              284 kB
AnonHugePages:         0 kB
ShmemHugePages:        0 kB
ShmemPmdMapped:        0 kB
FileHugePages:     18432 kB
FilePmdMapped:         0 kB
HugePages_Total:       0
HugePages_Free:        0
HugePages_Rsvd:        0
HugePages_Surp:        0
Hugepagesize:       2048 kB
Hugetlb:               0 kB
DirectMap4k:       24576 kB
DirectMap2M:     2072576 kB
DirectMap1G:     6291456 kB
";

    const STAT: &str = "\
cpu  16285 3 1921 74890 217 1 4 135 0 0
cpu0 16285 3 1921 74890 217 1 4 135 0 0
intr 93778 0 0 0 0 0
ctxt 185963
btime 1792268170
processes 4465
procs_running 2
procs_blocked 0
softirq 41233 0 11893 2 1490 0 0 3 16093 0 11752
";

    const LOADAVG: &str = "0.06 0.27 0.16 2/73 4466\n";

    fn fake_proc() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("meminfo"), MEMINFO).unwrap();
        std::fs::write(dir.path().join("stat"), STAT).unwrap();
        std::fs::write(dir.path().join("loadavg"), LOADAVG).unwrap();
        dir
    }

    #[test]
    fn memory_is_reported_in_kb() {
        let dir = fake_proc();
        let mem = ProcfsProvider::new(dir.path(), "/").memory().unwrap();

        assert_eq!(mem.mem_total, 6147400);
        assert_eq!(mem.mem_free, 3633044);
        assert_eq!(mem.mem_available, 5638700);
        assert_eq!(mem.buffers, 70084);
        assert_eq!(mem.cached, 2122864);
        assert_eq!(mem.swap_total, 2097148);
        assert_eq!(mem.swap_free, 2097000);
    }

    #[test]
    fn cpu_reads_aggregate_ticks() {
        let dir = fake_proc();
        let cpu = ProcfsProvider::new(dir.path(), "/").cpu().unwrap();

        assert_eq!(cpu.user, 16285);
        assert_eq!(cpu.nice, 3);
        assert_eq!(cpu.system, 1921);
        assert_eq!(cpu.idle, 74890);
        assert_eq!(cpu.iowait, 217);
        assert_eq!(cpu.irq, 1);
        assert_eq!(cpu.softirq, 4);
        assert_eq!(cpu.steal, 135);
        assert_eq!(cpu.guest, 0);
    }

    #[test]
    fn load_reads_averages_and_process_counts() {
        let dir = fake_proc();
        let load = ProcfsProvider::new(dir.path(), "/").load().unwrap();

        assert!((load.last1 - 0.06).abs() < 1e-6);
        assert!((load.last5 - 0.27).abs() < 1e-6);
        assert!((load.last15 - 0.16).abs() < 1e-6);
        assert_eq!(load.process_running, 2);
        assert_eq!(load.process_total, 73);
        assert_eq!(load.last_pid, 4466);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = fake_proc();
        std::fs::remove_file(dir.path().join("loadavg")).unwrap();
        let provider = ProcfsProvider::new(dir.path(), "/");

        match provider.load() {
            Err(StatsError::Read { path, .. }) => assert_eq!(path, dir.path().join("loadavg")),
            other => panic!("expected read error, got {:?}", other),
        }
        assert!(provider.memory().is_ok());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = fake_proc();
        std::fs::write(dir.path().join("loadavg"), "not a load average\n").unwrap();
        let provider = ProcfsProvider::new(dir.path(), "/");

        match provider.load() {
            Err(StatsError::Parse { path, .. }) => assert_eq!(path, dir.path().join("loadavg")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn collected_from_fake_proc() {
        let dir = fake_proc();
        let provider = ProcfsProvider::new(dir.path(), "/");

        let stats = Stats::collect(&provider, 2);

        assert_eq!(stats.mem_used_kb(), 6147400 - 5638700);
        assert!(stats.cpu_usage() > 0.0 && stats.cpu_usage() < 1.0);
        assert_eq!(stats.load_stats.process_total, 73);
        assert_eq!(stats.task_count, 2);
    }
}
