//! Pure scheduling-policy logic.
//!
//! Everything in this module is free of `unsafe`, inline assembly and the
//! process table's global statics: it operates on a lightweight snapshot
//! of the fields a policy actually needs (`ProcView`) and returns the slot
//! index of the winner, if any. `proc::scheduler` builds the snapshot
//! under each slot's lock and feeds it through `Policy::pick_next`; the
//! actual dispatch (locking, `state = RUNNING`, `swtch`) stays in
//! `proc.rs`, which is architecture-dependent and not host-testable.
//!
//! Keeping policy selection pure is what makes it possible to unit-test
//! the five algorithms (and the two bugs the source had) without ever
//! booting a kernel.

/// Tagged variant over the five selectable scheduling policies. Exactly
/// one is compiled in, chosen by a `sched-*` Cargo feature (see
/// `kernel/Cargo.toml`); `ACTIVE_POLICY` is the single value the
/// scheduler loop dispatches on, replacing what the source expressed
/// with preprocessor conditional compilation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Policy {
    RoundRobin,
    Fcfs,
    Lottery,
    Pbs,
    Mlfq,
}

impl Policy {
    /// FCFS and PBS run a dispatched process to completion; every other
    /// policy is preempted by the timer tick (§4.6/§4.7).
    pub fn allows_preemption(self) -> bool {
        !matches!(self, Policy::Fcfs | Policy::Pbs)
    }
}

#[cfg(feature = "sched-fcfs")]
pub const ACTIVE_POLICY: Policy = Policy::Fcfs;
#[cfg(feature = "sched-lbs")]
pub const ACTIVE_POLICY: Policy = Policy::Lottery;
#[cfg(feature = "sched-pbs")]
pub const ACTIVE_POLICY: Policy = Policy::Pbs;
#[cfg(feature = "sched-mlfq")]
pub const ACTIVE_POLICY: Policy = Policy::Mlfq;
#[cfg(not(any(feature = "sched-fcfs", feature = "sched-lbs", feature = "sched-pbs", feature = "sched-mlfq")))]
pub const ACTIVE_POLICY: Policy = Policy::RoundRobin;

/// A process as the scheduler sees it: just enough to pick a winner.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProcView {
    pub idx: usize,
    pub create_time: u64,
    pub tickets: u32,
    pub priority: u8,
    pub niceness: u8,
    pub times_scheduled: u64,
    pub queue: usize,
    pub entry_time: u64,
    pub time_ran_in_queue: u64,
}

/// `DP = clamp(priority - niceness + 5, 0, 100)`. Lower DP is more urgent.
pub fn dynamic_priority(priority: u8, niceness: u8) -> i32 {
    let dp = priority as i32 - niceness as i32 + 5;
    dp.clamp(0, 100)
}

fn pbs_key(p: &ProcView) -> (i32, u64, u64) {
    (dynamic_priority(p.priority, p.niceness), p.times_scheduled, p.create_time)
}

/// FCFS: the RUNNABLE process with the smallest creation tick.
pub fn pick_fcfs<'a>(candidates: impl Iterator<Item = &'a ProcView>) -> Option<usize> {
    candidates.min_by_key(|p| p.create_time).map(|p| p.idx)
}

/// PBS: minimum `(DP, timesScheduled, createTime)`, lexicographically.
pub fn pick_pbs<'a>(candidates: impl Iterator<Item = &'a ProcView>) -> Option<usize> {
    candidates.min_by_key(|p| pbs_key(p)).map(|p| p.idx)
}

/// Round-robin with an explicit cursor so a single call picks exactly one
/// winner without starving later slots: scan starting just past `cursor`,
/// wrapping around the table once.
pub fn pick_round_robin(nproc: usize, cursor: usize, mut runnable: impl FnMut(usize) -> bool) -> Option<usize> {
    if nproc == 0 {
        return None;
    }
    for step in 1..=nproc {
        let idx = (cursor + step) % nproc;
        if runnable(idx) {
            return Some(idx);
        }
    }
    None
}

/// xv6's linear-congruential generator. `reseed` is unconditional: the
/// source's `srand` only reset `next` when `seed == 0`, which is backwards
/// (it means the RNG is reseeded on every tick *except* when `ticks == 0`).
/// See DESIGN.md.
#[derive(Copy, Clone, Debug)]
pub struct Lcg(u64);

impl Lcg {
    pub const fn new(seed: u64) -> Self {
        Lcg(seed)
    }

    pub fn reseed(&mut self, seed: u64) {
        self.0 = seed;
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1103515245).wrapping_add(12345);
        ((self.0 / 65536) % 32768) as u32
    }
}

/// LBS: draw a uniform integer in `[0, total_tickets)` and walk the
/// RUNNABLE set, subtracting tickets until the running counter goes
/// negative. `draw` is the raw RNG output; callers reduce it mod the
/// ticket total themselves only if they want a distribution wider than
/// the LCG's native `[0, 32768)` range (xv6 takes `rand() % total`
/// directly, which this mirrors).
pub fn pick_lottery<'a, I>(candidates: I, draw: u32) -> Option<usize>
where
    I: Iterator<Item = &'a ProcView> + Clone,
{
    let total: u32 = candidates.clone().map(|p| p.tickets).sum();
    if total == 0 {
        return None;
    }
    let mut counter: i64 = (draw % total) as i64;
    for p in candidates {
        counter -= p.tickets as i64;
        if counter < 0 {
            return Some(p.idx);
        }
    }
    None
}

pub const MLFQ_LEVELS: usize = 5;
pub const MLFQ_QUANTUM: [u64; MLFQ_LEVELS] = [1, 2, 4, 8, 16];
/// Index 0 (queue 0) never ages further up; its entry is unused.
pub const MLFQ_AGING_LIMIT: [u64; MLFQ_LEVELS] = [0, 50, 100, 150, 200];

/// Demotion: a RUNNING/RUNNABLE process that has consumed its whole
/// quantum at its current level drops one level (queues cap at 4).
pub fn mlfq_should_demote(queue: usize, time_ran_in_queue: u64) -> bool {
    queue < MLFQ_LEVELS - 1 && time_ran_in_queue >= MLFQ_QUANTUM[queue]
}

pub fn mlfq_wait_time(now: u64, entry_time: u64, time_ran_in_queue: u64) -> u64 {
    now.saturating_sub(entry_time).saturating_sub(time_ran_in_queue)
}

/// Aging: a RUNNABLE/SLEEPING process at queue >= 1 that has waited at
/// least that queue's aging limit without running is promoted one level.
pub fn mlfq_should_promote(queue: usize, now: u64, entry_time: u64, time_ran_in_queue: u64) -> bool {
    queue >= 1 && mlfq_wait_time(now, entry_time, time_ran_in_queue) >= MLFQ_AGING_LIMIT[queue]
}

/// Selection within queues 0..=3: lowest queue number wins, ties broken by
/// smallest `entryTime` (longest-waiting first). Returns `None` if no
/// RUNNABLE candidate exists above queue 4 -- callers must then, and only
/// then, fall back to round-robin over queue 4 (`pick_round_robin`
/// filtered to `queue == 4`). The source instead ran the queue-4 sweep
/// unconditionally after this one, which double-dispatches a process
/// picked here whenever queue 4 happens to also hold a RUNNABLE slot in
/// the same iteration; see DESIGN.md.
pub fn mlfq_select_top<'a>(candidates: impl Iterator<Item = &'a ProcView>) -> Option<usize> {
    candidates
        .filter(|p| p.queue < MLFQ_LEVELS - 1)
        .min_by_key(|p| (p.queue, p.entry_time))
        .map(|p| p.idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(idx: usize) -> ProcView {
        ProcView {
            idx,
            create_time: 0,
            tickets: 1,
            priority: 60,
            niceness: 5,
            times_scheduled: 0,
            queue: 0,
            entry_time: 0,
            time_ran_in_queue: 0,
        }
    }

    #[test]
    fn dynamic_priority_clamps() {
        assert_eq!(dynamic_priority(60, 5), 60);
        assert_eq!(dynamic_priority(0, 10), 0);
        assert_eq!(dynamic_priority(100, 0), 100);
        assert_eq!(dynamic_priority(0, 0), 5);
    }

    #[test]
    fn fcfs_picks_earliest_creation() {
        let procs = vec![
            ProcView { create_time: 12, ..view(0) },
            ProcView { create_time: 10, ..view(1) },
            ProcView { create_time: 11, ..view(2) },
        ];
        assert_eq!(pick_fcfs(procs.iter()), Some(1));
    }

    #[test]
    fn fcfs_on_empty_set_picks_nothing() {
        let procs: Vec<ProcView> = vec![];
        assert_eq!(pick_fcfs(procs.iter()), None);
    }

    #[test]
    fn pbs_orders_by_dp_then_times_scheduled_then_create_time() {
        let procs = vec![
            ProcView { priority: 60, niceness: 5, times_scheduled: 3, create_time: 1, ..view(0) }, // DP 60
            ProcView { priority: 40, niceness: 5, times_scheduled: 9, create_time: 2, ..view(1) }, // DP 40, wins
            ProcView { priority: 40, niceness: 5, times_scheduled: 2, create_time: 9, ..view(2) }, // DP 40, timesScheduled tie-break
        ];
        // idx 1 and idx 2 share DP 40; idx 2 has the smaller timesScheduled, so it wins.
        assert_eq!(pick_pbs(procs.iter()), Some(2));
    }

    #[test]
    fn pbs_breaks_ties_by_create_time_last() {
        let procs = vec![
            ProcView { priority: 60, niceness: 5, times_scheduled: 1, create_time: 20, ..view(0) },
            ProcView { priority: 60, niceness: 5, times_scheduled: 1, create_time: 10, ..view(1) },
        ];
        assert_eq!(pick_pbs(procs.iter()), Some(1));
    }

    #[test]
    fn round_robin_wraps_and_skips_non_runnable() {
        let runnable = [false, true, false, true, false];
        // cursor sitting on 1 (just dispatched): next candidate is 3.
        assert_eq!(pick_round_robin(5, 1, |i| runnable[i]), Some(3));
        // cursor sitting on 3: wraps around to 1.
        assert_eq!(pick_round_robin(5, 3, |i| runnable[i]), Some(1));
    }

    #[test]
    fn round_robin_single_runnable_never_starves_when_alone() {
        let runnable = [false, false, true, false];
        assert_eq!(pick_round_robin(4, 2, |i| runnable[i]), Some(2));
    }

    #[test]
    fn round_robin_nothing_runnable_picks_none() {
        assert_eq!(pick_round_robin(4, 0, |_| false), None);
    }

    #[test]
    fn lottery_single_runnable_is_deterministic_regardless_of_draw() {
        let procs = vec![ProcView { tickets: 1, ..view(0) }];
        for draw in [0u32, 1, 5000, 32767] {
            assert_eq!(pick_lottery(procs.iter(), draw), Some(0));
        }
    }

    #[test]
    fn lottery_picks_by_cumulative_ticket_ranges() {
        let procs = vec![
            ProcView { tickets: 3, ..view(0) }, // covers draws [0,3)
            ProcView { tickets: 9, ..view(1) }, // covers draws [3,12)
        ];
        assert_eq!(pick_lottery(procs.iter(), 0), Some(0));
        assert_eq!(pick_lottery(procs.iter(), 2), Some(0));
        assert_eq!(pick_lottery(procs.iter(), 3), Some(1));
        assert_eq!(pick_lottery(procs.iter(), 11), Some(1));
    }

    #[test]
    fn lottery_fairness_over_many_draws() {
        let procs = vec![
            ProcView { tickets: 1, ..view(0) },
            ProcView { tickets: 9, ..view(1) },
        ];
        let mut rng = Lcg::new(12345);
        let mut wins = [0u32; 2];
        for _ in 0..10_000 {
            let draw = rng.next_u32();
            if let Some(winner) = pick_lottery(procs.iter(), draw) {
                wins[winner] += 1;
            }
        }
        // Expect roughly a 1:9 split; allow generous slack for LCG skew.
        assert!(wins[1] > 8_500 && wins[1] < 9_500, "wins[1] = {}", wins[1]);
    }

    #[test]
    fn lcg_reseed_is_unconditional() {
        let mut rng = Lcg::new(1);
        rng.next_u32();
        rng.reseed(0);
        let mut fresh = Lcg::new(0);
        assert_eq!(rng.next_u32(), fresh.next_u32());
    }

    #[test]
    fn mlfq_demotes_after_full_quantum() {
        assert!(!mlfq_should_demote(0, 0));
        assert!(mlfq_should_demote(0, 1));
        assert!(mlfq_should_demote(1, 2));
        assert!(mlfq_should_demote(3, 8));
        assert!(!mlfq_should_demote(4, 1_000)); // queue 4 is the floor
    }

    #[test]
    fn mlfq_cpu_bound_process_reaches_queue_four_after_fifteen_ticks() {
        // quanta are 1,2,4,8 for queues 0..3 -> 15 ticks of continuous CPU
        // is exactly enough to demote through every level once.
        let mut queue = 0usize;
        let mut consumed = 0u64;
        for _ in 0..15 {
            consumed += 1;
            if mlfq_should_demote(queue, consumed) {
                queue += 1;
                consumed = 0;
            }
        }
        assert_eq!(queue, 4);
    }

    #[test]
    fn mlfq_promotes_only_at_or_past_its_aging_limit() {
        assert!(!mlfq_should_promote(4, 199, 0, 0));
        assert!(mlfq_should_promote(4, 200, 0, 0));
        assert!(mlfq_should_promote(3, 150, 0, 0));
        assert!(!mlfq_should_promote(0, 10_000, 0, 0)); // queue 0 never ages
    }

    #[test]
    fn mlfq_selects_lowest_queue_then_oldest_entry_time() {
        let procs = vec![
            ProcView { queue: 2, entry_time: 5, ..view(0) },
            ProcView { queue: 1, entry_time: 9, ..view(1) },
            ProcView { queue: 1, entry_time: 3, ..view(2) }, // wins: lower queue, older entry
        ];
        assert_eq!(mlfq_select_top(procs.iter()), Some(2));
    }

    #[test]
    fn only_fcfs_and_pbs_suppress_timer_preemption() {
        assert!(Policy::RoundRobin.allows_preemption());
        assert!(!Policy::Fcfs.allows_preemption());
        assert!(Policy::Lottery.allows_preemption());
        assert!(!Policy::Pbs.allows_preemption());
        assert!(Policy::Mlfq.allows_preemption());
    }

    #[test]
    fn mlfq_top_selection_ignores_queue_four() {
        let procs = vec![ProcView { queue: 4, entry_time: 0, ..view(0) }];
        assert_eq!(mlfq_select_top(procs.iter()), None);
    }
}
