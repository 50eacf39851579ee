// Coordinador + merger en el mismo proceso, conectados a mano por el canal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use common::{
    JobRequest, JobResultView, JobStatus, MergeRule, MergedResult, MergerMessage, Task,
    TaskCompleteRequest, TaskOutcome, TaskSpec,
};
use junction::{Coordinator, CoordinatorConfig, RetryPolicy};
use junction_merger::Merger;

struct Harness {
    coord: Arc<Coordinator>,
    merger: Merger,
    rx: UnboundedReceiver<MergerMessage>,
    // todo lo que pasó por el canal, para inspeccionar después
    seen: Vec<MergerMessage>,
}

impl Harness {
    fn new(max_retries: u32) -> Self {
        let config = CoordinatorConfig {
            retry: RetryPolicy {
                max_retries,
                backoff_base: Duration::from_millis(100),
                backoff_max: Duration::from_secs(1),
            },
            task_timeout: Duration::from_secs(5),
            ..CoordinatorConfig::default()
        };
        let (tx, rx) = unbounded_channel();
        Self {
            coord: Arc::new(Coordinator::new(config, tx)),
            merger: Merger::new(),
            rx,
            seen: Vec::new(),
        }
    }

    /// Hace lo mismo que el forwarder, sin HTTP.
    fn pump(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            self.seen.push(msg.clone());
            let outcome = self.merger.handle(msg);
            self.coord.on_merge_outcome(outcome);
        }
    }

    fn submit(&mut self, job_id: &str, rule: MergeRule, tasks: Vec<TaskSpec>) {
        self.coord
            .submit(JobRequest {
                id: Some(job_id.to_string()),
                name: job_id.to_string(),
                tasks,
                merge_rule: rule,
            })
            .unwrap();
        self.pump();
    }

    fn take_all(&self, worker: &str) -> Vec<Task> {
        std::iter::from_fn(|| self.coord.next_task(worker)).collect()
    }

    fn report(&mut self, task: &Task, outcome: TaskOutcome) -> bool {
        let accepted = self
            .coord
            .on_executor_result(TaskCompleteRequest {
                worker_id: "w1".to_string(),
                job_id: task.job_id.clone(),
                task_id: task.id.clone(),
                attempt: task.attempt,
                outcome,
            })
            .unwrap()
            .is_some();
        self.pump();
        accepted
    }

    fn succeed(&mut self, task: &Task) -> bool {
        let payload = task.payload.clone();
        self.report(task, TaskOutcome::Success { payload })
    }

    fn fail(&mut self, task: &Task) -> bool {
        self.report(
            task,
            TaskOutcome::Failure {
                reason: "exit code 1".to_string(),
            },
        )
    }

    fn merged(&self, job_id: &str) -> Option<MergedResult> {
        match self.coord.result(job_id)? {
            JobResultView::Completed { result } => Some(result),
            _ => None,
        }
    }

    fn completions_sent(&self, job_id: &str) -> usize {
        self.seen
            .iter()
            .filter(|m| matches!(m, MergerMessage::EndOfDispatch { job_id: j, .. } if j == job_id))
            .count()
    }
}

fn spec(id: &str, payload: &str) -> TaskSpec {
    TaskSpec {
        id: id.to_string(),
        payload: payload.to_string(),
        optional: false,
        sequence: None,
        command: None,
    }
}

fn by_id<'a>(tasks: &'a [Task], id: &str) -> &'a Task {
    tasks.iter().find(|t| t.id == id).unwrap()
}

fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            out.push(tail);
        }
    }
    out
}

#[tokio::test]
async fn ejemplo_abc_orden_de_llegada_no_importa() {
    let mut h = Harness::new(3);
    h.submit(
        "abc",
        MergeRule::default(),
        vec![spec("A", "a"), spec("B", "b"), spec("C", "c")],
    );
    let tasks = h.take_all("w1");
    assert_eq!(tasks.len(), 3);

    h.succeed(by_id(&tasks, "B"));
    h.succeed(by_id(&tasks, "A"));
    assert!(h.merged("abc").is_none());
    h.succeed(by_id(&tasks, "C"));

    let result = h.merged("abc").expect("job completado");
    assert_eq!(result.payload, "a\nb\nc");
    assert_eq!(result.contributors, vec!["A", "B", "C"]);
    assert!(result.missing.is_empty());
    assert_eq!(h.coord.status("abc").unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn pistas_de_secuencia_mandan_sobre_el_id() {
    let mut h = Harness::new(0);
    let mut z = spec("z", "primero");
    z.sequence = Some(1);
    let mut a = spec("a", "segundo");
    a.sequence = Some(2);

    h.submit(
        "seq",
        MergeRule::Concat {
            separator: " ".to_string(),
        },
        vec![a, spec("m", "tercero"), z],
    );
    for t in h.take_all("w1") {
        h.succeed(&t);
    }
    assert_eq!(h.merged("seq").unwrap().payload, "primero segundo tercero");
}

#[tokio::test]
async fn toda_permutacion_de_llegada_da_un_unico_resultado_igual() {
    let ids = ["t1", "t2", "t3", "t4"];
    let mut expected: Option<String> = None;

    for (n, order) in permutations(&[0, 1, 2, 3]).into_iter().enumerate() {
        let mut h = Harness::new(0);
        let job_id = format!("perm-{}", n);
        h.submit(
            &job_id,
            MergeRule::default(),
            ids.iter().map(|id| spec(id, &id.to_uppercase())).collect(),
        );
        let tasks = h.take_all("w1");
        for i in order {
            h.succeed(by_id(&tasks, ids[i]));
        }

        let result = h.merged(&job_id).expect("completado");
        assert_eq!(result.contributors.len(), ids.len());
        assert_eq!(h.completions_sent(&job_id), 1);

        match &expected {
            None => expected = Some(result.payload.clone()),
            Some(p) => assert_eq!(&result.payload, p),
        }
    }
    assert_eq!(expected.unwrap(), "T1\nT2\nT3\nT4");
}

#[tokio::test]
async fn suma_es_independiente_del_orden() {
    let mut h = Harness::new(0);
    h.submit(
        "suma",
        MergeRule::Sum,
        vec![spec("a", "10"), spec("b", "-3"), spec("c", "5")],
    );
    let tasks = h.take_all("w1");
    h.succeed(by_id(&tasks, "c"));
    h.succeed(by_id(&tasks, "a"));
    h.succeed(by_id(&tasks, "b"));
    assert_eq!(h.merged("suma").unwrap().payload, "12");
}

#[tokio::test]
async fn aporte_duplicado_no_cambia_el_resultado() {
    let mut h = Harness::new(0);
    h.submit("dup", MergeRule::default(), vec![spec("A", "a"), spec("B", "b")]);
    let tasks = h.take_all("w1");

    h.succeed(by_id(&tasks, "A"));
    // reintento del forwarder: el mismo aporte llega dos veces
    let again = h
        .seen
        .iter()
        .find_map(|m| match m {
            MergerMessage::Partial(p) if p.task_id == "A" => Some(p.clone()),
            _ => None,
        })
        .unwrap();
    h.merger.handle(MergerMessage::Partial(again.clone()));
    h.succeed(by_id(&tasks, "B"));

    let first = h.merged("dup").unwrap();
    assert_eq!(first.payload, "a\nb");

    let outcome = h.merger.handle(MergerMessage::Partial(again));
    h.coord.on_merge_outcome(outcome);
    assert_eq!(h.merged("dup").unwrap(), first);
}

#[tokio::test(start_paused = true)]
async fn reintentos_agotados_fallan_el_job_sin_resultado() {
    let mut h = Harness::new(1);
    h.submit("falla", MergeRule::default(), vec![spec("A", "a"), spec("B", "b")]);
    let tasks = h.take_all("w1");
    let b = by_id(&tasks, "B").clone();

    h.fail(by_id(&tasks, "A"));
    tokio::time::sleep(Duration::from_millis(150)).await;
    let retry = h.take_all("w1");
    assert_eq!(retry.len(), 1);
    assert_eq!(retry[0].attempt, 2);
    h.fail(&retry[0]);

    let info = h.coord.status("falla").unwrap();
    assert_eq!(info.status, JobStatus::Failed);
    assert!(info.failure.as_deref().unwrap().contains("exit code 1"));

    // el éxito tardío de B no produce resultado
    assert!(!h.succeed(&b));
    assert!(h.merged("falla").is_none());
    assert_eq!(h.merger.view("falla").unwrap().state, "failed");
    assert!(h.merger.view("falla").unwrap().result.is_none());
}

#[tokio::test]
async fn cancelar_impide_el_resultado() {
    let mut h = Harness::new(3);
    h.submit("cancel", MergeRule::default(), vec![spec("A", "a"), spec("B", "b")]);
    let tasks = h.take_all("w1");
    h.succeed(by_id(&tasks, "A"));

    h.coord.cancel("cancel").unwrap();
    h.pump();

    assert!(!h.succeed(by_id(&tasks, "B")));
    assert!(h.merged("cancel").is_none());
    match h.coord.result("cancel").unwrap() {
        JobResultView::Failed { reason } => assert_eq!(reason, junction::CANCELLED_REASON),
        other => panic!("esperaba Failed, llegó {:?}", other),
    }
    assert!(h.merger.is_terminal("cancel"));
    assert!(h.merger.view("cancel").unwrap().result.is_none());
}

#[tokio::test(start_paused = true)]
async fn opcional_que_vence_da_resultado_degradado() {
    let mut h = Harness::new(0);
    let mut b = spec("B", "b");
    b.optional = true;
    h.submit("degradado", MergeRule::default(), vec![spec("A", "a"), b, spec("C", "c")]);

    let tasks = h.take_all("w1");
    h.succeed(by_id(&tasks, "A"));
    h.succeed(by_id(&tasks, "C"));
    assert!(h.merged("degradado").is_none());

    // B nunca responde
    tokio::time::sleep(Duration::from_secs(6)).await;
    h.pump();

    let result = h.merged("degradado").expect("completado degradado");
    assert_eq!(result.payload, "a\n<missing:B>\nc");
    assert_eq!(result.missing, vec!["B"]);
    assert_eq!(result.contributors, vec!["A", "C"]);
    assert_eq!(h.completions_sent("degradado"), 1);
}

#[tokio::test(start_paused = true)]
async fn requerida_que_vence_y_luego_responde_cuenta_una_sola_vez() {
    let mut h = Harness::new(1);
    h.submit("tarde", MergeRule::default(), vec![spec("A", "a")]);
    let first = h.take_all("w1").remove(0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let second = h.take_all("w2").remove(0);
    assert_eq!(second.attempt, 2);

    // el primer intento responde tarde: descartado
    assert!(!h.succeed(&first));
    assert!(h.succeed(&second));

    let result = h.merged("tarde").unwrap();
    assert_eq!(result.payload, "a");
    assert_eq!(
        h.seen
            .iter()
            .filter(|m| matches!(m, MergerMessage::Partial(_)))
            .count(),
        1
    );
}
